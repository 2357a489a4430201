use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A single button transition as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeEvent {
    Down,
    Up,
}

/// Edge counts of one closed interaction window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GestureRecord {
    pub num_down: u32,
    pub num_up: u32,
}

impl GestureRecord {
    pub fn from_edges(edges: &[EdgeEvent]) -> Self {
        let num_down = edges.iter().filter(|e| **e == EdgeEvent::Down).count() as u32;
        let num_up = edges.len() as u32 - num_down;
        Self { num_down, num_up }
    }

    pub fn press_type(&self) -> PressType {
        PressType {
            presses: self.num_down,
            hold: self.num_down != self.num_up,
        }
    }
}

/// Classified gesture: press count plus whether the button was still held
/// when the window closed.
///
/// Renders as `"{n}press"` or `"{n}pressHold"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PressType {
    pub presses: u32,
    pub hold: bool,
}

impl PressType {
    pub const SINGLE: PressType = PressType::new(1, false);
    pub const DOUBLE: PressType = PressType::new(2, false);
    pub const TRIPLE: PressType = PressType::new(3, false);
    pub const SINGLE_HOLD: PressType = PressType::new(1, true);
    pub const DOUBLE_HOLD: PressType = PressType::new(2, true);
    pub const TRIPLE_HOLD: PressType = PressType::new(3, true);

    pub const fn new(presses: u32, hold: bool) -> Self {
        Self { presses, hold }
    }
}

impl fmt::Display for PressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hold {
            write!(f, "{}pressHold", self.presses)
        } else {
            write!(f, "{}press", self.presses)
        }
    }
}

impl FromStr for PressType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (count, hold) = if let Some(count) = s.strip_suffix("pressHold") {
            (count, true)
        } else if let Some(count) = s.strip_suffix("press") {
            (count, false)
        } else {
            anyhow::bail!("Invalid press type: {}", s);
        };
        let presses = count
            .parse::<u32>()
            .map_err(|_| anyhow::anyhow!("Invalid press count in: {}", s))?;
        Ok(Self { presses, hold })
    }
}

/// Bluetooth device address, stored most significant byte first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BdAddr(pub [u8; 6]);

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for BdAddr {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() != 6 {
            anyhow::bail!("Invalid bluetooth address: {}", s);
        }

        let mut bytes = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            if part.len() != 2 {
                anyhow::bail!("Invalid bluetooth address: {}", s);
            }
            bytes[i] = u8::from_str_radix(part, 16)
                .map_err(|_| anyhow::anyhow!("Invalid bluetooth address: {}", s))?;
        }
        Ok(Self(bytes))
    }
}

/// Connection latency requested from the Flic daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LatencyMode {
    NormalLatency,
    #[default]
    LowLatency,
    HighLatency,
}

#[cfg(test)]
mod tests {
    use super::*;
    use EdgeEvent::{Down, Up};

    #[test]
    fn test_press_type_display() {
        assert_eq!(PressType::SINGLE.to_string(), "1press");
        assert_eq!(PressType::TRIPLE_HOLD.to_string(), "3pressHold");
        assert_eq!(PressType::new(5, false).to_string(), "5press");
    }

    #[test]
    fn test_press_type_parse() {
        assert_eq!("2press".parse::<PressType>().unwrap(), PressType::DOUBLE);
        assert_eq!(
            "1pressHold".parse::<PressType>().unwrap(),
            PressType::SINGLE_HOLD
        );
        assert!("press".parse::<PressType>().is_err());
        assert!("twopress".parse::<PressType>().is_err());
    }

    #[test]
    fn test_record_counts_and_classification() {
        let record = GestureRecord::from_edges(&[Down, Up, Down]);
        assert_eq!(record.num_down, 2);
        assert_eq!(record.num_up, 1);
        assert_eq!(record.press_type(), PressType::DOUBLE_HOLD);

        let record = GestureRecord::from_edges(&[Down, Up, Down, Up, Down, Up]);
        assert_eq!(record.press_type(), PressType::TRIPLE);
    }

    #[test]
    fn test_bd_addr_round_trip() {
        let addr: BdAddr = "80:E4:DA:71:2B:0C".parse().unwrap();
        assert_eq!(addr.0, [0x80, 0xe4, 0xda, 0x71, 0x2b, 0x0c]);
        assert_eq!(addr.to_string(), "80:e4:da:71:2b:0c");
    }

    #[test]
    fn test_bd_addr_rejects_garbage() {
        assert!("80:e4:da:71:2b".parse::<BdAddr>().is_err());
        assert!("80:e4:da:71:2b:zz".parse::<BdAddr>().is_err());
        assert!("80e4:da:71:2b:0c:11".parse::<BdAddr>().is_err());
    }
}
