//! Per-record index of the well-known top-level keys

use crate::record::{Record, Value};

/// Top-level keys a template token may reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WellKnownKey {
    Type,
    Model,
    Subtype,
    Channel,
    Id,
    Protocol,
}

impl WellKnownKey {
    pub const ALL: [WellKnownKey; 6] = [
        WellKnownKey::Type,
        WellKnownKey::Model,
        WellKnownKey::Subtype,
        WellKnownKey::Channel,
        WellKnownKey::Id,
        WellKnownKey::Protocol,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            WellKnownKey::Type => "type",
            WellKnownKey::Model => "model",
            WellKnownKey::Subtype => "subtype",
            WellKnownKey::Channel => "channel",
            WellKnownKey::Id => "id",
            WellKnownKey::Protocol => "protocol",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == key)
    }

    fn slot(self) -> usize {
        self as usize
    }
}

/// Captures of the first field for each [`WellKnownKey`], built with a
/// single scan and shared by every topic family routing the record.
#[derive(Debug, Clone, Copy)]
pub struct WellKnownFields<'a> {
    slots: [Option<&'a Value>; 6],
}

impl<'a> WellKnownFields<'a> {
    pub fn scan(record: &'a Record) -> Self {
        let mut slots = [None; 6];
        for field in record.fields() {
            if let Some(key) = WellKnownKey::from_key(&field.key) {
                let slot = &mut slots[key.slot()];
                if slot.is_none() {
                    *slot = Some(&field.value);
                }
            }
        }
        Self { slots }
    }

    pub fn get(&self, key: WellKnownKey) -> Option<&'a Value> {
        self.slots[key.slot()]
    }

    /// Device readings carry a `model`; station state records do not
    pub fn has_model(&self) -> bool {
        self.get(WellKnownKey::Model).is_some()
    }
}
