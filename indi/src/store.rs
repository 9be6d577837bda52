//! Property cache for one INDI session

use crate::client::IndiEvent;
use crate::protocol::IndiMessage;
use crate::IndiProperty;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Devices and properties known to one session.
///
/// Written only by the session's reader task (and by the client when it
/// records a commanded switch state).
#[derive(Debug, Default)]
pub(crate) struct PropertyStore {
    devices: BTreeSet<String>,
    properties: HashMap<(String, String), IndiProperty>,
}

impl PropertyStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, device: &str, name: &str) -> Option<&IndiProperty> {
        self.properties.get(&(device.to_string(), name.to_string()))
    }

    pub(crate) fn get_mut(&mut self, device: &str, name: &str) -> Option<&mut IndiProperty> {
        self.properties.get_mut(&(device.to_string(), name.to_string()))
    }

    pub(crate) fn has_device(&self, device: &str) -> bool {
        self.devices.contains(device)
    }

    pub(crate) fn devices(&self) -> Vec<String> {
        self.devices.iter().cloned().collect()
    }

    pub(crate) fn properties_of(&self, device: &str) -> Vec<IndiProperty> {
        let mut props: Vec<IndiProperty> = self
            .properties
            .values()
            .filter(|p| p.device == device)
            .cloned()
            .collect();
        props.sort_by(|a, b| a.name.cmp(&b.name));
        props
    }

    pub(crate) fn clear(&mut self) {
        self.devices.clear();
        self.properties.clear();
    }

    /// Apply one server message and report what changed
    pub(crate) fn apply(&mut self, message: IndiMessage) -> Vec<IndiEvent> {
        let mut events = Vec::new();
        match message {
            IndiMessage::Define(mut prop) => {
                dedupe_elements(&mut prop);
                if self.devices.insert(prop.device.clone()) {
                    events.push(IndiEvent::DeviceDefined(prop.device.clone()));
                }
                events.push(IndiEvent::PropertyDefined {
                    device: prop.device.clone(),
                    name: prop.name.clone(),
                    kind: prop.kind,
                });
                self.properties
                    .insert((prop.device.clone(), prop.name.clone()), prop);
            }
            IndiMessage::Update {
                device,
                name,
                kind,
                state,
                message,
                values,
            } => {
                let Some(prop) = self.get_mut(&device, &name) else {
                    tracing::debug!("Update for undefined property {}.{}", device, name);
                    return events;
                };
                if prop.kind != kind {
                    tracing::warn!(
                        "Ignoring {} update for {} property {}.{}",
                        kind,
                        prop.kind,
                        device,
                        name
                    );
                    return events;
                }
                if let Some(state) = state {
                    prop.state = state;
                }
                if message.is_some() {
                    prop.message = message.clone();
                }
                for (element, value) in values {
                    match prop.element_mut(&element) {
                        Some(slot) => slot.value = value,
                        None => tracing::trace!("Unknown element {}.{}.{}", device, name, element),
                    }
                }
                let state = prop.state;
                events.push(IndiEvent::PropertyUpdated {
                    device: device.clone(),
                    name: name.clone(),
                    state,
                });
                if let Some(text) = message {
                    events.push(IndiEvent::Message {
                        device: Some(device),
                        text,
                    });
                }
            }
            IndiMessage::Delete { device, name: Some(name) } => {
                if self
                    .properties
                    .remove(&(device.clone(), name.clone()))
                    .is_some()
                {
                    events.push(IndiEvent::PropertyDeleted { device, name });
                }
            }
            IndiMessage::Delete { device, name: None } => {
                self.properties.retain(|(d, _), _| d != &device);
                if self.devices.remove(&device) {
                    events.push(IndiEvent::DeviceDeleted(device));
                }
            }
            IndiMessage::Message { device, text } => {
                events.push(IndiEvent::Message { device, text });
            }
        }
        events
    }
}

/// Element names within a property are unique; the first definition wins
fn dedupe_elements(prop: &mut IndiProperty) {
    let mut seen = HashSet::new();
    let before = prop.elements.len();
    prop.elements.retain(|e| seen.insert(e.name.clone()));
    if prop.elements.len() != before {
        tracing::warn!(
            "Dropped {} duplicate element(s) in {}.{}",
            before - prop.elements.len(),
            prop.device,
            prop.name
        );
    }
}
