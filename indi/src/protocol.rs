//! INDI XML Protocol definitions
//!
//! Incoming traffic is a stream of top-level XML elements. [`MessageBuilder`]
//! consumes `quick-xml` events one at a time and yields a complete
//! [`IndiMessage`] when a top-level element closes.

use crate::error::{IndiError, IndiResult};
use crate::{Element, IndiProperty, NumberLimits, Permission, PropertyKind, PropertyState, SwitchRule, Value};
use quick_xml::events::{BytesStart, Event};

/// INDI protocol version
pub const INDI_PROTOCOL_VERSION: &str = "1.7";

/// Standard INDI properties
pub mod standard_properties {
    /// Connection control switch
    pub const CONNECTION: &str = "CONNECTION";
    pub const CONNECT: &str = "CONNECT";
    pub const DISCONNECT: &str = "DISCONNECT";

    // Mount properties
    pub const TELESCOPE_PARK: &str = "TELESCOPE_PARK";

    // Dome properties
    pub const DOME_PARK: &str = "DOME_PARK";

    /// Park switch elements, shared by mount and dome drivers
    pub const PARK: &str = "PARK";
    pub const UNPARK: &str = "UNPARK";

    // Weather properties
    pub const WEATHER_STATUS: &str = "WEATHER_STATUS";
    pub const WEATHER_PARAMETERS: &str = "WEATHER_PARAMETERS";
}

/// Elements of the weather interface properties
pub mod weather_elements {
    // WEATHER_STATUS lights
    pub const WEATHER_RAIN: &str = "WEATHER_RAIN";
    pub const WEATHER_WIND: &str = "WEATHER_WIND";
    pub const WEATHER_CLOUDS: &str = "WEATHER_CLOUDS";

    // WEATHER_PARAMETERS numbers
    pub const WEATHER_RAIN_RATE: &str = "WEATHER_RAIN_RATE";
    pub const WEATHER_WIND_SPEED: &str = "WEATHER_WIND_SPEED";
    pub const WEATHER_WIND_GUST: &str = "WEATHER_WIND_GUST";
    pub const WEATHER_TEMPERATURE: &str = "WEATHER_TEMPERATURE";
}

/// A complete message received from the server
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum IndiMessage {
    /// `def*Vector`: full property definition
    Define(IndiProperty),
    /// `set*Vector`: new state and/or element values
    Update {
        device: String,
        name: String,
        kind: PropertyKind,
        state: Option<PropertyState>,
        message: Option<String>,
        values: Vec<(String, Value)>,
    },
    /// `delProperty`: one property, or the whole device when `name` is absent
    Delete {
        device: String,
        name: Option<String>,
    },
    /// `message`: free-form device or server text
    Message {
        device: Option<String>,
        text: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VectorOp {
    Define,
    Update,
}

#[derive(Debug)]
struct PendingVector {
    op: VectorOp,
    kind: PropertyKind,
    device: String,
    name: String,
    label: Option<String>,
    group: String,
    state: Option<PropertyState>,
    perm: Permission,
    rule: Option<SwitchRule>,
    message: Option<String>,
    elements: Vec<PendingElement>,
}

#[derive(Debug)]
struct PendingElement {
    name: String,
    label: Option<String>,
    limits: Option<NumberLimits>,
    text: String,
}

/// Incremental assembler of [`IndiMessage`]s from XML events
#[derive(Debug, Default)]
pub(crate) struct MessageBuilder {
    vector: Option<PendingVector>,
    element: Option<PendingElement>,
    /// Tag of a vector being skipped (BLOBs, unknown vectors)
    skipping: Option<String>,
}

impl MessageBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Feed one XML event; returns a message when one completes
    pub(crate) fn feed(&mut self, event: &Event<'_>) -> IndiResult<Option<IndiMessage>> {
        if let Some(skipped) = &self.skipping {
            if let Event::End(e) = event {
                if e.name().as_ref() == skipped.as_bytes() {
                    self.skipping = None;
                }
            }
            return Ok(None);
        }

        match event {
            Event::Start(e) => self.open(e, false),
            Event::Empty(e) => self.open(e, true),
            Event::Text(t) => {
                if let Some(element) = self.element.as_mut() {
                    let text = t
                        .unescape()
                        .map_err(|e| IndiError::Parse(e.to_string()))?;
                    element.text.push_str(&text);
                }
                Ok(None)
            }
            Event::End(e) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                Ok(self.close(&tag))
            }
            _ => Ok(None),
        }
    }

    fn open(&mut self, e: &BytesStart<'_>, empty: bool) -> IndiResult<Option<IndiMessage>> {
        let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();

        if let Some(op_kind) = vector_tag(&tag) {
            let Some((op, kind)) = op_kind else {
                // BLOB or unsupported vector
                if !empty {
                    self.skipping = Some(tag);
                }
                return Ok(None);
            };
            let device = get_attribute(e, "device").unwrap_or_default();
            let Some(name) = get_attribute(e, "name") else {
                tracing::debug!("Ignoring <{}> without a name attribute", tag);
                if !empty {
                    self.skipping = Some(tag);
                }
                return Ok(None);
            };
            self.vector = Some(PendingVector {
                op,
                kind,
                device,
                name,
                label: get_attribute(e, "label"),
                group: get_attribute(e, "group").unwrap_or_default(),
                state: get_attribute(e, "state").and_then(|s| PropertyState::parse(&s)),
                perm: get_attribute(e, "perm")
                    .map(|p| Permission::parse(&p))
                    .unwrap_or(Permission::ReadWrite),
                rule: get_attribute(e, "rule").and_then(|r| SwitchRule::parse(&r)),
                message: get_attribute(e, "message"),
                elements: Vec::new(),
            });
            self.element = None;
            if empty {
                return Ok(self.close(&tag));
            }
            return Ok(None);
        }

        if is_element_tag(&tag) {
            if let Some(vector) = self.vector.as_ref() {
                let limits = if vector.kind == PropertyKind::Number && vector.op == VectorOp::Define {
                    Some(NumberLimits {
                        min: get_attribute(e, "min").and_then(|s| parse_number(&s)),
                        max: get_attribute(e, "max").and_then(|s| parse_number(&s)),
                        step: get_attribute(e, "step").and_then(|s| parse_number(&s)),
                        format: get_attribute(e, "format"),
                    })
                } else {
                    None
                };
                let element = PendingElement {
                    name: get_attribute(e, "name").unwrap_or_default(),
                    label: get_attribute(e, "label"),
                    limits,
                    text: String::new(),
                };
                if empty {
                    self.push_element(element);
                } else {
                    self.element = Some(element);
                }
            }
            return Ok(None);
        }

        match tag.as_str() {
            "delProperty" => {
                let Some(device) = get_attribute(e, "device") else {
                    return Ok(None);
                };
                Ok(Some(IndiMessage::Delete {
                    device,
                    name: get_attribute(e, "name"),
                }))
            }
            "message" => Ok(get_attribute(e, "message").map(|text| IndiMessage::Message {
                device: get_attribute(e, "device"),
                text,
            })),
            _ => {
                if !empty && self.vector.is_none() {
                    tracing::trace!("Skipping unhandled INDI element <{}>", tag);
                    self.skipping = Some(tag);
                }
                Ok(None)
            }
        }
    }

    fn push_element(&mut self, element: PendingElement) {
        if let Some(vector) = self.vector.as_mut() {
            if element.name.is_empty() {
                tracing::debug!("Dropping unnamed element in {}.{}", vector.device, vector.name);
                return;
            }
            vector.elements.push(element);
        }
    }

    fn close(&mut self, tag: &str) -> Option<IndiMessage> {
        if is_element_tag(tag) {
            if let Some(element) = self.element.take() {
                self.push_element(element);
            }
            return None;
        }

        if vector_tag(tag).is_some() {
            let vector = self.vector.take()?;
            return Some(finish_vector(vector));
        }

        None
    }
}

fn finish_vector(vector: PendingVector) -> IndiMessage {
    let kind = vector.kind;
    let mut values = Vec::with_capacity(vector.elements.len());
    let mut elements = Vec::with_capacity(vector.elements.len());

    for pending in vector.elements {
        let Some(value) = Value::parse(kind, &pending.text) else {
            tracing::debug!(
                "Unparseable {} value '{}' for {}.{}.{}",
                kind,
                pending.text.trim(),
                vector.device,
                vector.name,
                pending.name
            );
            continue;
        };
        match vector.op {
            VectorOp::Define => elements.push(Element {
                label: pending.label.unwrap_or_else(|| pending.name.clone()),
                name: pending.name,
                value,
                limits: pending.limits,
            }),
            VectorOp::Update => values.push((pending.name, value)),
        }
    }

    match vector.op {
        VectorOp::Define => IndiMessage::Define(IndiProperty {
            label: vector.label.unwrap_or_else(|| vector.name.clone()),
            device: vector.device,
            name: vector.name,
            group: vector.group,
            kind,
            state: vector.state.unwrap_or(PropertyState::Idle),
            perm: if kind == PropertyKind::Light {
                Permission::ReadOnly
            } else {
                vector.perm
            },
            rule: if kind == PropertyKind::Switch {
                Some(vector.rule.unwrap_or(SwitchRule::AnyOfMany))
            } else {
                None
            },
            elements,
            message: vector.message,
        }),
        VectorOp::Update => IndiMessage::Update {
            device: vector.device,
            name: vector.name,
            kind,
            state: vector.state,
            message: vector.message,
            values,
        },
    }
}

/// Classify a tag as a property vector.
///
/// `None`: not a vector. `Some(None)`: a vector this client ignores (BLOBs,
/// client-side `new*` echoes). `Some(Some(..))`: a handled vector.
fn vector_tag(tag: &str) -> Option<Option<(VectorOp, PropertyKind)>> {
    let body = tag.strip_suffix("Vector")?;
    let (op, fragment) = if let Some(rest) = body.strip_prefix("def") {
        (Some(VectorOp::Define), rest)
    } else if let Some(rest) = body.strip_prefix("set") {
        (Some(VectorOp::Update), rest)
    } else if let Some(rest) = body.strip_prefix("new") {
        (None, rest)
    } else {
        return None;
    };
    let kind = PropertyKind::from_tag_fragment(fragment);
    Some(op.zip(kind))
}

/// `defSwitch`, `oneNumber`, ... (element tags inside a vector)
fn is_element_tag(tag: &str) -> bool {
    let fragment = tag
        .strip_prefix("def")
        .or_else(|| tag.strip_prefix("one"));
    matches!(fragment, Some(f) if PropertyKind::from_tag_fragment(f).is_some())
}

/// Helper to get an unescaped attribute from an XML start tag
fn get_attribute(e: &BytesStart<'_>, name: &str) -> Option<String> {
    e.attributes()
        .filter_map(|a| a.ok())
        .find(|a| a.key.as_ref() == name.as_bytes())
        .map(|a| match a.unescape_value() {
            Ok(v) => v.to_string(),
            Err(_) => String::from_utf8_lossy(&a.value).to_string(),
        })
}

/// Parse an INDI number: plain decimal or sexagesimal (`"-12:30:00"`, `"5 15"`)
pub(crate) fn parse_number(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(v) = raw.parse::<f64>() {
        return Some(v);
    }

    let (negative, body) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw.strip_prefix('+').unwrap_or(raw)),
    };

    let mut total = 0.0;
    let mut scale = 1.0;
    let mut parts = 0;
    for part in body.split(|c: char| c == ':' || c.is_whitespace()).filter(|p| !p.is_empty()) {
        let v: f64 = part.parse().ok()?;
        if v < 0.0 || parts == 3 {
            return None;
        }
        total += v / scale;
        scale *= 60.0;
        parts += 1;
    }
    if parts == 0 {
        return None;
    }
    Some(if negative { -total } else { total })
}

/// Build a `new*Vector` command carrying the given element values
pub(crate) fn new_vector_xml(
    kind: PropertyKind,
    device: &str,
    name: &str,
    values: &[(String, Value)],
) -> String {
    let fragment = kind.tag_fragment();
    let mut xml = format!(
        "<new{}Vector device=\"{}\" name=\"{}\">",
        fragment,
        quick_xml::escape::escape(device),
        quick_xml::escape::escape(name)
    );
    for (element, value) in values {
        let text = match value {
            Value::Switch(true) => "On".to_string(),
            Value::Switch(false) => "Off".to_string(),
            Value::Number(n) => n.to_string(),
            Value::Text(t) => quick_xml::escape::escape(t.as_str()).to_string(),
            Value::Light(s) => s.to_string(),
        };
        xml.push_str(&format!(
            "<one{} name=\"{}\">{}</one{}>",
            fragment,
            quick_xml::escape::escape(element.as_str()),
            text,
            fragment
        ));
    }
    xml.push_str(&format!("</new{}Vector>", fragment));
    xml
}

/// `getProperties` request, optionally scoped to one device
pub(crate) fn get_properties_xml(device: Option<&str>) -> String {
    match device {
        Some(device) => format!(
            "<getProperties version=\"{}\" device=\"{}\"/>",
            INDI_PROTOCOL_VERSION,
            quick_xml::escape::escape(device)
        ),
        None => format!("<getProperties version=\"{}\"/>", INDI_PROTOCOL_VERSION),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quick_xml::Reader;

    fn parse_all(xml: &str) -> Vec<IndiMessage> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);
        let mut builder = MessageBuilder::new();
        let mut out = Vec::new();
        loop {
            match reader.read_event() {
                Ok(Event::Eof) => break,
                Ok(event) => {
                    if let Some(msg) = builder.feed(&event).unwrap() {
                        out.push(msg);
                    }
                }
                Err(e) => panic!("xml error: {}", e),
            }
        }
        out
    }

    #[test]
    fn test_parse_number_plain_and_sexagesimal() {
        assert_eq!(parse_number("4.25"), Some(4.25));
        assert_eq!(parse_number(" -3 "), Some(-3.0));
        assert_eq!(parse_number("12:30:00"), Some(12.5));
        assert_eq!(parse_number("-0:30"), Some(-0.5));
        assert_eq!(parse_number("5 15"), Some(5.25));
        assert_eq!(parse_number("1:2:3:4"), None);
        assert_eq!(parse_number("abc"), None);
        assert_eq!(parse_number(""), None);
    }

    #[test]
    fn test_define_switch_vector() {
        let xml = r#"<defSwitchVector device="Telescope Simulator" name="TELESCOPE_PARK" label="Parking" group="Site Management" state="Idle" perm="rw" rule="OneOfMany" timeout="60">
            <defSwitch name="PARK" label="Park(ed)">On</defSwitch>
            <defSwitch name="UNPARK" label="UnPark(ed)">Off</defSwitch>
        </defSwitchVector>"#;
        let msgs = parse_all(xml);
        assert_eq!(msgs.len(), 1);
        let IndiMessage::Define(prop) = &msgs[0] else {
            panic!("expected definition, got {:?}", msgs[0]);
        };
        assert_eq!(prop.device, "Telescope Simulator");
        assert_eq!(prop.name, "TELESCOPE_PARK");
        assert_eq!(prop.group, "Site Management");
        assert_eq!(prop.kind, PropertyKind::Switch);
        assert_eq!(prop.rule, Some(SwitchRule::OneOfMany));
        assert_eq!(prop.switch("PARK"), Some(true));
        assert_eq!(prop.switch("UNPARK"), Some(false));
        assert_eq!(prop.element("PARK").map(|e| e.label.as_str()), Some("Park(ed)"));
    }

    #[test]
    fn test_define_number_vector_with_limits() {
        let xml = r#"<defNumberVector device="Weather" name="WEATHER_PARAMETERS" state="Ok" perm="ro">
            <defNumber name="WEATHER_WIND_SPEED" format="%4.2f" min="0" max="200" step="0">
                12.5
            </defNumber>
        </defNumberVector>"#;
        let msgs = parse_all(xml);
        let IndiMessage::Define(prop) = &msgs[0] else {
            panic!("expected definition");
        };
        assert_eq!(prop.perm, Permission::ReadOnly);
        assert_eq!(prop.number("WEATHER_WIND_SPEED"), Some(12.5));
        let limits = prop.elements[0].limits.clone().unwrap();
        assert_eq!(limits.min, Some(0.0));
        assert_eq!(limits.max, Some(200.0));
        assert_eq!(limits.format.as_deref(), Some("%4.2f"));
    }

    #[test]
    fn test_set_vector_with_state_and_message() {
        let xml = r#"<setSwitchVector device="Dome Simulator" name="DOME_PARK" state="Alert" timestamp="2024-01-01T00:00:00" message="Shutter jammed">
            <oneSwitch name="PARK">Off</oneSwitch>
        </setSwitchVector>"#;
        let msgs = parse_all(xml);
        assert_eq!(
            msgs,
            vec![IndiMessage::Update {
                device: "Dome Simulator".to_string(),
                name: "DOME_PARK".to_string(),
                kind: PropertyKind::Switch,
                state: Some(PropertyState::Alert),
                message: Some("Shutter jammed".to_string()),
                values: vec![("PARK".to_string(), Value::Switch(false))],
            }]
        );
    }

    #[test]
    fn test_empty_set_vector_updates_state_only() {
        let msgs = parse_all(r#"<setNumberVector device="Mount" name="EQUATORIAL_EOD_COORD" state="Busy"/>"#);
        assert!(matches!(
            &msgs[0],
            IndiMessage::Update { state: Some(PropertyState::Busy), values, .. } if values.is_empty()
        ));
    }

    #[test]
    fn test_light_vector_and_delete_and_message() {
        let xml = r#"
            <defLightVector device="Weather" name="WEATHER_STATUS" state="Alert">
                <defLight name="WEATHER_RAIN">Alert</defLight>
                <defLight name="WEATHER_WIND">Ok</defLight>
            </defLightVector>
            <message device="Weather" timestamp="2024-01-01T00:00:00" message="Rain detected"/>
            <delProperty device="Weather" name="WEATHER_STATUS"/>
            <delProperty device="Weather"/>
        "#;
        let msgs = parse_all(xml);
        assert_eq!(msgs.len(), 4);
        let IndiMessage::Define(prop) = &msgs[0] else {
            panic!("expected definition");
        };
        assert_eq!(prop.perm, Permission::ReadOnly);
        assert_eq!(
            prop.element("WEATHER_RAIN").and_then(|e| e.value.as_light()),
            Some(PropertyState::Alert)
        );
        assert_eq!(
            msgs[1],
            IndiMessage::Message {
                device: Some("Weather".to_string()),
                text: "Rain detected".to_string()
            }
        );
        assert_eq!(
            msgs[2],
            IndiMessage::Delete {
                device: "Weather".to_string(),
                name: Some("WEATHER_STATUS".to_string())
            }
        );
        assert_eq!(
            msgs[3],
            IndiMessage::Delete {
                device: "Weather".to_string(),
                name: None
            }
        );
    }

    #[test]
    fn test_blob_vectors_are_skipped() {
        let xml = r#"
            <setBLOBVector device="CCD Simulator" name="CCD1" state="Ok">
                <oneBLOB name="CCD1" size="4" format=".fits">AAAA</oneBLOB>
            </setBLOBVector>
            <setTextVector device="CCD Simulator" name="DRIVER_INFO" state="Ok">
                <oneText name="DRIVER_NAME">CCD &amp; Guider</oneText>
            </setTextVector>
        "#;
        let msgs = parse_all(xml);
        assert_eq!(msgs.len(), 1);
        let IndiMessage::Update { values, .. } = &msgs[0] else {
            panic!("expected update");
        };
        assert_eq!(values[0].1, Value::Text("CCD & Guider".to_string()));
    }

    #[test]
    fn test_new_vector_xml_escapes_content() {
        let xml = new_vector_xml(
            PropertyKind::Text,
            "Obs <1>",
            "SITE",
            &[("NOTE".to_string(), Value::Text("a & \"b\"".to_string()))],
        );
        assert!(xml.starts_with("<newTextVector device=\"Obs &lt;1&gt;\" name=\"SITE\">"));
        assert!(xml.contains("a &amp; &quot;b&quot;"));
        assert!(xml.ends_with("</newTextVector>"));

        let xml = new_vector_xml(
            PropertyKind::Switch,
            "Dome",
            "DOME_PARK",
            &[
                ("PARK".to_string(), Value::Switch(true)),
                ("UNPARK".to_string(), Value::Switch(false)),
            ],
        );
        assert_eq!(
            xml,
            "<newSwitchVector device=\"Dome\" name=\"DOME_PARK\">\
             <oneSwitch name=\"PARK\">On</oneSwitch>\
             <oneSwitch name=\"UNPARK\">Off</oneSwitch>\
             </newSwitchVector>"
        );
    }

    #[test]
    fn test_get_properties_xml() {
        assert_eq!(get_properties_xml(None), "<getProperties version=\"1.7\"/>");
        assert!(get_properties_xml(Some("Dome")).contains("device=\"Dome\""));
    }
}
