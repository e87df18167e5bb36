//! Occupant lists sent to the supplier on commit.
//!
//! Only the guest of record is a real person. The supplier wants a name per
//! occupant, so the remaining adults and children get placeholder names that
//! share the lead guest's last name.

use serde::{Deserialize, Serialize};

/// Largest party, adults plus children, a single booking may carry.
pub const MAX_OCCUPANTS: u32 = 20;

/// Checks a party size: at least one adult, at most [`MAX_OCCUPANTS`] in total.
pub fn party_size_error(adults: u32, children: u32) -> Option<String> {
    if adults == 0 {
        return Some("At least one adult is required.".to_string());
    }
    if adults.saturating_add(children) > MAX_OCCUPANTS {
        return Some(format!("A booking can hold at most {MAX_OCCUPANTS} guests."));
    }
    None
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestName {
    pub first_name: String,
    pub last_name: String,
}

impl GuestName {
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
        }
    }

    /// Splits a full name on whitespace: first token is the first name, the
    /// rest is the last name. A single word is used for both.
    pub fn split(full_name: &str) -> Self {
        let mut parts = full_name.split_whitespace();
        match parts.next() {
            None => Self::new("Guest", "Guest"),
            Some(first) => {
                let rest = parts.collect::<Vec<_>>().join(" ");
                if rest.is_empty() {
                    Self::new(first, first)
                } else {
                    Self::new(first, rest)
                }
            }
        }
    }
}

/// Names for every occupant of the room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestRoster {
    pub adults: Vec<GuestName>,
    pub children: Vec<GuestName>,
}

impl GuestRoster {
    /// Builds the roster from the guest of record.
    ///
    /// At least one adult is always listed, even if `adults` is zero.
    pub fn for_stay(lead_guest: &str, adults: u32, children: u32) -> Self {
        let lead = GuestName::split(lead_guest);
        let last_name = lead.last_name.clone();

        let mut adult_names = vec![lead];
        adult_names.extend(
            (2..=adults.max(1)).map(|n| GuestName::new(format!("Guest{n}"), last_name.clone())),
        );

        let child_names = (1..=children)
            .map(|n| GuestName::new(format!("Child{n}"), last_name.clone()))
            .collect();

        Self {
            adults: adult_names,
            children: child_names,
        }
    }

    pub fn occupants(&self) -> usize {
        self.adults.len() + self.children.len()
    }
}
