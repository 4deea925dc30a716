//! SunSpec model catalogue and point decoding.
//!
//! Only the models an inverter exporter cares about are described: the
//! common block (model 1) and the integer inverter models (101, 102, 103).
//! Any other model still shows up by name, just without points.

use crate::model::{Point, PointValue};

/// `SunS` marker preceding the model list.
pub const SUNS_MARKER: [u16; 2] = [0x5375, 0x6e53];

/// Base addresses probed for the marker, in order.
pub const BASE_ADDRESSES: [u16; 3] = [40000, 0, 50000];

/// Model id terminating the model list.
pub const END_MODEL_ID: u16 = 0xFFFF;

/// Register encoding of a point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointType {
    Uint16,
    Int16,
    Uint32,
    Acc32,
    Enum16,
    Bitfield16,
    Bitfield32,
    Sunssf,
    /// String spanning the given number of registers.
    String(u16),
}

impl PointType {
    /// Number of registers occupied.
    pub fn register_count(&self) -> u16 {
        match self {
            PointType::Uint16
            | PointType::Int16
            | PointType::Enum16
            | PointType::Bitfield16
            | PointType::Sunssf => 1,
            PointType::Uint32 | PointType::Acc32 | PointType::Bitfield32 => 2,
            PointType::String(n) => *n,
        }
    }
}

/// Static description of a point within a model.
#[derive(Debug, Clone, Copy)]
pub struct PointDef {
    pub name: &'static str,
    pub offset: u16,
    pub kind: PointType,
    pub units: Option<&'static str>,
    /// Name of the scale factor point applied to this one.
    pub sf: Option<&'static str>,
    pub description: &'static str,
    /// Enum value symbols.
    pub symbols: &'static [(u16, &'static str)],
}

const fn point(
    name: &'static str,
    offset: u16,
    kind: PointType,
    units: Option<&'static str>,
    sf: Option<&'static str>,
    description: &'static str,
) -> PointDef {
    PointDef {
        name,
        offset,
        kind,
        units,
        sf,
        description,
        symbols: &[],
    }
}

const fn scale(name: &'static str, offset: u16) -> PointDef {
    point(name, offset, PointType::Sunssf, None, None, "Scale factor")
}

/// Static description of a model.
#[derive(Debug)]
pub struct ModelDef {
    pub ids: &'static [u16],
    pub name: &'static str,
    pub points: &'static [PointDef],
}

const OPERATING_STATES: &[(u16, &str)] = &[
    (1, "OFF"),
    (2, "SLEEPING"),
    (3, "STARTING"),
    (4, "MPPT"),
    (5, "THROTTLED"),
    (6, "SHUTTING_DOWN"),
    (7, "FAULT"),
    (8, "STANDBY"),
];

const COMMON_POINTS: &[PointDef] = &[
    point("Mn", 0, PointType::String(16), None, None, "Manufacturer"),
    point("Md", 16, PointType::String(16), None, None, "Model"),
    point("Opt", 32, PointType::String(8), None, None, "Options"),
    point("Vr", 40, PointType::String(8), None, None, "Version"),
    point("SN", 48, PointType::String(16), None, None, "Serial Number"),
    point("DA", 64, PointType::Uint16, None, None, "Device Address"),
];

const INVERTER_POINTS: &[PointDef] = &[
    point("A", 0, PointType::Uint16, Some("A"), Some("A_SF"), "AC Current"),
    point("AphA", 1, PointType::Uint16, Some("A"), Some("A_SF"), "Phase A Current"),
    point("AphB", 2, PointType::Uint16, Some("A"), Some("A_SF"), "Phase B Current"),
    point("AphC", 3, PointType::Uint16, Some("A"), Some("A_SF"), "Phase C Current"),
    scale("A_SF", 4),
    point("PPVphAB", 5, PointType::Uint16, Some("V"), Some("V_SF"), "Phase Voltage AB"),
    point("PPVphBC", 6, PointType::Uint16, Some("V"), Some("V_SF"), "Phase Voltage BC"),
    point("PPVphCA", 7, PointType::Uint16, Some("V"), Some("V_SF"), "Phase Voltage CA"),
    point("PhVphA", 8, PointType::Uint16, Some("V"), Some("V_SF"), "Phase Voltage AN"),
    point("PhVphB", 9, PointType::Uint16, Some("V"), Some("V_SF"), "Phase Voltage BN"),
    point("PhVphC", 10, PointType::Uint16, Some("V"), Some("V_SF"), "Phase Voltage CN"),
    scale("V_SF", 11),
    point("W", 12, PointType::Int16, Some("W"), Some("W_SF"), "AC Power"),
    scale("W_SF", 13),
    point("Hz", 14, PointType::Uint16, Some("Hz"), Some("Hz_SF"), "Line Frequency"),
    scale("Hz_SF", 15),
    point("VA", 16, PointType::Int16, Some("VA"), Some("VA_SF"), "AC Apparent Power"),
    scale("VA_SF", 17),
    point("VAr", 18, PointType::Int16, Some("var"), Some("VAr_SF"), "AC Reactive Power"),
    scale("VAr_SF", 19),
    point("PF", 20, PointType::Int16, Some("Pct"), Some("PF_SF"), "AC Power Factor"),
    scale("PF_SF", 21),
    point("WH", 22, PointType::Acc32, Some("Wh"), Some("WH_SF"), "AC Energy"),
    scale("WH_SF", 24),
    point("DCA", 25, PointType::Uint16, Some("A"), Some("DCA_SF"), "DC Current"),
    scale("DCA_SF", 26),
    point("DCV", 27, PointType::Uint16, Some("V"), Some("DCV_SF"), "DC Voltage"),
    scale("DCV_SF", 28),
    point("DCW", 29, PointType::Int16, Some("W"), Some("DCW_SF"), "DC Power"),
    scale("DCW_SF", 30),
    point("TmpCab", 31, PointType::Int16, Some("C"), Some("Tmp_SF"), "Cabinet Temperature"),
    point("TmpSnk", 32, PointType::Int16, Some("C"), Some("Tmp_SF"), "Heat Sink Temperature"),
    point("TmpTrns", 33, PointType::Int16, Some("C"), Some("Tmp_SF"), "Transformer Temperature"),
    point("TmpOt", 34, PointType::Int16, Some("C"), Some("Tmp_SF"), "Other Temperature"),
    scale("Tmp_SF", 35),
    PointDef {
        symbols: OPERATING_STATES,
        ..point("St", 36, PointType::Enum16, None, None, "Operating State")
    },
    point("StVnd", 37, PointType::Enum16, None, None, "Vendor Operating State"),
    point("Evt1", 38, PointType::Bitfield32, None, None, "Event Flags"),
    point("Evt2", 40, PointType::Bitfield32, None, None, "Event Flags (reserved)"),
    point("EvtVnd1", 42, PointType::Bitfield32, None, None, "Vendor Event Flags 1"),
    point("EvtVnd2", 44, PointType::Bitfield32, None, None, "Vendor Event Flags 2"),
    point("EvtVnd3", 46, PointType::Bitfield32, None, None, "Vendor Event Flags 3"),
    point("EvtVnd4", 48, PointType::Bitfield32, None, None, "Vendor Event Flags 4"),
];

const MODELS: &[ModelDef] = &[
    ModelDef {
        ids: &[1],
        name: "common",
        points: COMMON_POINTS,
    },
    ModelDef {
        ids: &[101, 102, 103],
        name: "inverter",
        points: INVERTER_POINTS,
    },
];

/// Look up the catalogue entry for a model id.
pub fn lookup(id: u16) -> Option<&'static ModelDef> {
    MODELS.iter().find(|m| m.ids.contains(&id))
}

/// Name reported for a model id.
pub fn model_name(id: u16) -> String {
    match lookup(id) {
        Some(def) => def.name.to_string(),
        None => format!("model_{}", id),
    }
}

/// Decode every point of a model from its register block.
///
/// Points that do not fit in `regs` are omitted.
pub fn decode_model(def: &ModelDef, regs: &[u16]) -> Vec<Point> {
    def.points
        .iter()
        .filter_map(|p| {
            let raw = slice(regs, p)?;
            let value = decode_point(def, p, raw, regs);
            let mut point = Point::new(p.name, value).with_description(p.description);
            point.units = p.units.map(str::to_string);
            Some(point)
        })
        .collect()
}

fn slice<'a>(regs: &'a [u16], def: &PointDef) -> Option<&'a [u16]> {
    let start = def.offset as usize;
    let end = start + def.kind.register_count() as usize;
    regs.get(start..end)
}

fn decode_point(model: &ModelDef, def: &PointDef, raw: &[u16], regs: &[u16]) -> Option<PointValue> {
    let value = decode_raw(def, raw)?;

    let Some(sf_name) = def.sf else {
        return Some(value);
    };
    let sf = model
        .points
        .iter()
        .find(|p| p.name == sf_name)
        .and_then(|p| slice(regs, p))
        .and_then(|r| decode_sunssf(r[0]));

    match (value, sf) {
        (PointValue::Integer(v), Some(sf)) => apply_scale(v, sf),
        (value, _) => Some(value),
    }
}

/// Decode a raw register slice; `None` for "not implemented" sentinels.
fn decode_raw(def: &PointDef, raw: &[u16]) -> Option<PointValue> {
    match def.kind {
        PointType::Uint16 | PointType::Bitfield16 => {
            (raw[0] != 0xFFFF).then_some(PointValue::Integer(raw[0] as i64))
        }
        PointType::Int16 => decode_sunssf(raw[0]).map(|v| PointValue::Integer(v as i64)),
        PointType::Sunssf => decode_sunssf(raw[0]).map(|v| PointValue::Integer(v as i64)),
        PointType::Enum16 => {
            if raw[0] == 0xFFFF {
                return None;
            }
            if def.symbols.is_empty() {
                return Some(PointValue::Integer(raw[0] as i64));
            }
            // Unlisted codes stay categorical so the label schema never flips.
            let label = match def.symbols.iter().find(|(v, _)| *v == raw[0]) {
                Some((_, symbol)) => symbol.to_string(),
                None => raw[0].to_string(),
            };
            Some(PointValue::Text(label))
        }
        PointType::Uint32 | PointType::Bitfield32 => {
            let v = u32_from(raw);
            (v != 0xFFFF_FFFF).then_some(PointValue::Integer(v as i64))
        }
        PointType::Acc32 => {
            let v = u32_from(raw);
            (v != 0).then_some(PointValue::Integer(v as i64))
        }
        PointType::String(_) => {
            let bytes: Vec<u8> = raw.iter().flat_map(|r| r.to_be_bytes()).collect();
            let text = String::from_utf8_lossy(&bytes);
            let text = text.trim_end_matches('\0').trim();
            (!text.is_empty()).then(|| PointValue::Text(text.to_string()))
        }
    }
}

fn u32_from(raw: &[u16]) -> u32 {
    ((raw[0] as u32) << 16) | (raw[1] as u32)
}

/// Signed 16-bit value; 0x8000 means not implemented.
fn decode_sunssf(raw: u16) -> Option<i16> {
    (raw != 0x8000).then_some(raw as i16)
}

/// Apply a power-of-ten scale factor. Factors outside -10..=10 are invalid.
pub fn apply_scale(value: i64, sf: i16) -> Option<PointValue> {
    match sf {
        0 => Some(PointValue::Integer(value)),
        1..=10 => value
            .checked_mul(10i64.pow(sf as u32))
            .map(PointValue::Integer),
        -10..=-1 => Some(PointValue::Float(value as f64 / 10f64.powi(-sf as i32))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inverter_block() -> Vec<u16> {
        let mut regs = vec![0xFFFFu16; 50];
        regs[0] = 1234; // A
        regs[4] = (-2i16) as u16; // A_SF
        regs[12] = 1234; // W
        regs[13] = (-1i16) as u16; // W_SF
        regs[14] = 5001; // Hz
        regs[15] = (-2i16) as u16; // Hz_SF
        regs[16] = 0x8000; // VA not implemented
        regs[17] = 0;
        regs[22] = 0x0001; // WH high word
        regs[23] = 0x0000; // WH low word
        regs[24] = 1; // WH_SF
        regs[36] = 4; // St = MPPT
        regs[38] = 0;
        regs[39] = 0;
        regs
    }

    fn find<'a>(points: &'a [Point], name: &str) -> &'a Point {
        points.iter().find(|p| p.name == name).unwrap()
    }

    #[test]
    fn test_lookup_and_names() {
        assert_eq!(model_name(1), "common");
        assert_eq!(model_name(101), "inverter");
        assert_eq!(model_name(103), "inverter");
        assert_eq!(model_name(160), "model_160");
        assert!(lookup(160).is_none());
    }

    #[test]
    fn test_inverter_point_offsets_fit_model_length() {
        let def = lookup(103).unwrap();
        let end = def
            .points
            .iter()
            .map(|p| p.offset + p.kind.register_count())
            .max()
            .unwrap();
        assert_eq!(end, 50);
    }

    #[test]
    fn test_decode_scaled_values() {
        let points = decode_model(lookup(103).unwrap(), &inverter_block());

        assert_eq!(find(&points, "A").value, Some(PointValue::Float(12.34)));
        assert_eq!(find(&points, "W").value, Some(PointValue::Float(123.4)));
        assert_eq!(find(&points, "Hz").value, Some(PointValue::Float(50.01)));
        assert_eq!(find(&points, "WH").value, Some(PointValue::Integer(655_360)));
        assert_eq!(find(&points, "W").units.as_deref(), Some("W"));
        assert_eq!(find(&points, "W").description, "AC Power");
    }

    #[test]
    fn test_decode_not_implemented_is_null() {
        let points = decode_model(lookup(103).unwrap(), &inverter_block());

        assert_eq!(find(&points, "AphA").value, None);
        assert_eq!(find(&points, "VA").value, None);
        assert_eq!(find(&points, "StVnd").value, None);
        assert_eq!(find(&points, "Evt2").value, None);
    }

    #[test]
    fn test_decode_enum_symbol() {
        let points = decode_model(lookup(103).unwrap(), &inverter_block());

        assert_eq!(find(&points, "St").value, Some(PointValue::from("MPPT")));
        assert_eq!(find(&points, "Evt1").value, Some(PointValue::Integer(0)));
    }

    #[test]
    fn test_decode_unknown_enum_code_is_text() {
        let mut regs = inverter_block();
        regs[36] = 42;
        regs[37] = 7;
        let points = decode_model(lookup(103).unwrap(), &regs);

        assert_eq!(find(&points, "St").value, Some(PointValue::from("42")));
        // Enums without a symbol table stay numeric.
        assert_eq!(find(&points, "StVnd").value, Some(PointValue::Integer(7)));
    }

    #[test]
    fn test_decode_common_strings() {
        let mut regs = vec![0u16; 66];
        regs[0] = u16::from_be_bytes([b'F', b'r']);
        regs[1] = u16::from_be_bytes([b'o', b'n']);
        regs[2] = u16::from_be_bytes([b'i', b'u']);
        regs[3] = u16::from_be_bytes([b's', 0]);
        regs[64] = 1;

        let points = decode_model(lookup(1).unwrap(), &regs);

        assert_eq!(find(&points, "Mn").value, Some(PointValue::from("Fronius")));
        assert_eq!(find(&points, "Md").value, None);
        assert_eq!(find(&points, "DA").value, Some(PointValue::Integer(1)));
    }

    #[test]
    fn test_short_block_omits_points() {
        let regs = vec![0u16; 20];
        let points = decode_model(lookup(103).unwrap(), &regs);

        assert!(points.iter().any(|p| p.name == "VAr_SF"));
        assert!(!points.iter().any(|p| p.name == "PF"));
        assert!(!points.iter().any(|p| p.name == "St"));
    }

    #[test]
    fn test_apply_scale() {
        assert_eq!(apply_scale(5, 0), Some(PointValue::Integer(5)));
        assert_eq!(apply_scale(5, 2), Some(PointValue::Integer(500)));
        assert_eq!(apply_scale(5, -1), Some(PointValue::Float(0.5)));
        assert_eq!(apply_scale(5, 11), None);
    }
}
