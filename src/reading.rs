// reading.rs

use crate::*;

/// One decoded snapshot of the meter, raw scaled integers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Reading {
    pub voltage_deci: u32,
    pub current_milli: u32,
    pub power_deci: u32,
    pub energy_wh: u32,
    pub frequency_deci: u32,
    pub power_factor_centi: u32,
    pub voltage_min: u32,
    pub voltage_max: u32,
}

/// Served by the XML endpoint until the first reading is published.
pub const EMPTY_XML: &str = "<?xml version='1.0'?><xml></xml>";

#[derive(Template)]
#[template(
    source = "<?xml version='1.0'?><xml><vMin>{{ r.voltage_min }}</vMin><vMax>{{ r.voltage_max }}</vMax><voltage>{{ r.voltage_deci }}</voltage><current>{{ r.current_milli }}</current><power>{{ r.power_deci }}</power><energy>{{ r.energy_wh }}</energy><pf>{{ r.power_factor_centi }}</pf><freq>{{ r.frequency_deci }}</freq></xml>",
    ext = "xml"
)]
struct ReadingXml<'a> {
    r: &'a Reading,
}

impl Reading {
    pub fn to_xml(&self) -> String {
        match (ReadingXml { r: self }).render() {
            Ok(xml) => xml,
            Err(e) => {
                error!("Cannot render reading xml: {e}");
                EMPTY_XML.into()
            }
        }
    }
}

/// Running minimum and maximum of published voltages.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VoltageRange {
    bounds: Option<(u32, u32)>,
}

impl VoltageRange {
    /// Fold `reading.voltage_deci` into the range and stamp the result
    /// into the reading's min/max fields.
    pub fn track(&mut self, reading: &mut Reading) {
        let v = reading.voltage_deci;
        let (min, max) = match self.bounds {
            None => (v, v),
            Some((min, max)) => (min.min(v), max.max(v)),
        };
        self.bounds = Some((min, max));
        reading.voltage_min = min;
        reading.voltage_max = max;
    }

    pub fn clear(&mut self) {
        self.bounds = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Reading {
        Reading {
            voltage_deci: 2301,
            current_milli: 1500,
            power_deci: 3400,
            energy_wh: 12,
            frequency_deci: 500,
            power_factor_centi: 98,
            voltage_min: 2290,
            voltage_max: 2310,
        }
    }

    #[test]
    fn xml_layout() {
        assert_eq!(
            sample().to_xml(),
            "<?xml version='1.0'?><xml><vMin>2290</vMin><vMax>2310</vMax>\
             <voltage>2301</voltage><current>1500</current><power>3400</power>\
             <energy>12</energy><pf>98</pf><freq>500</freq></xml>"
        );
    }

    #[test]
    fn range_follows_voltage() {
        let mut range = VoltageRange::default();
        let mut r = sample();
        for v in [2300, 2250, 2350, 2310] {
            r.voltage_deci = v;
            range.track(&mut r);
        }
        assert_eq!((r.voltage_min, r.voltage_max), (2250, 2350));

        range.clear();
        r.voltage_deci = 2200;
        range.track(&mut r);
        assert_eq!((r.voltage_min, r.voltage_max), (2200, 2200));
    }
}
// EOF
