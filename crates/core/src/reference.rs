use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::TaskId;

pub type ReferenceId = u64;

/// Identifies which task, and which of its outputs, produced a reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub task_id: TaskId,
    pub output_index: usize,
}

/// The value universe exchanged between tasks.
///
/// A reference is always named by a stable id allocated from the global
/// name directory. `Future` names an output that has not been produced
/// yet; every other variant is a terminal or semi-terminal production.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Reference {
    Future {
        id: ReferenceId,
        provenance: Provenance,
    },
    Concrete {
        id: ReferenceId,
        size_hint: Option<u64>,
        location_hints: BTreeMap<String, String>,
        provenance: Provenance,
    },
    Data {
        id: ReferenceId,
        value: Vec<u8>,
    },
    Url {
        id: ReferenceId,
        url: String,
    },
    Error {
        id: ReferenceId,
        reason: String,
        details: Option<String>,
    },
    Null {
        id: ReferenceId,
    },
}

impl Reference {
    pub fn id(&self) -> ReferenceId {
        match self {
            Reference::Future { id, .. }
            | Reference::Concrete { id, .. }
            | Reference::Data { id, .. }
            | Reference::Url { id, .. }
            | Reference::Error { id, .. }
            | Reference::Null { id } => *id,
        }
    }

    pub fn is_future(&self) -> bool {
        matches!(self, Reference::Future { .. })
    }

    pub fn is_concrete(&self) -> bool {
        matches!(self, Reference::Concrete { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reference::Error { .. })
    }

    /// A reference is already satisfied for the purposes of dependency
    /// resolution once it carries a value or a terminal failure; only
    /// `Future` requires the caller to keep waiting.
    pub fn is_satisfied(&self) -> bool {
        !self.is_future()
    }

    /// Degrades a Concrete reference back into the Future that names the
    /// same production, used when every known location for it has been
    /// blacklisted by a MISSING_INPUT report.
    pub fn as_future(&self) -> Reference {
        match self {
            Reference::Concrete { id, provenance, .. } => Reference::Future {
                id: *id,
                provenance: provenance.clone(),
            },
            Reference::Future { .. } => self.clone(),
            other => Reference::Future {
                id: other.id(),
                provenance: Provenance {
                    task_id: String::new(),
                    output_index: 0,
                },
            },
        }
    }

    /// Merges two Concrete references for the same id by unioning their
    /// location hints. Panics if ids disagree or either side is not
    /// Concrete; callers are expected to have checked `is_concrete()`.
    pub fn combine_with(self, other: Reference) -> Reference {
        match (self, other) {
            (
                Reference::Concrete {
                    id,
                    size_hint,
                    mut location_hints,
                    provenance,
                },
                Reference::Concrete {
                    location_hints: other_hints,
                    size_hint: other_size,
                    ..
                },
            ) => {
                location_hints.extend(other_hints);
                Reference::Concrete {
                    id,
                    size_hint: size_hint.or(other_size),
                    location_hints,
                    provenance,
                }
            }
            (a, _) => a,
        }
    }

    /// Removes the named endpoints from a Concrete reference's location
    /// hints. Returns `None` if no endpoints remain, signalling that the
    /// caller must degrade this reference back to a Future.
    pub fn without_endpoints(self, endpoints: &[String]) -> Option<Reference> {
        match self {
            Reference::Concrete {
                id,
                size_hint,
                mut location_hints,
                provenance,
            } => {
                for endpoint in endpoints {
                    location_hints.remove(endpoint);
                }
                if location_hints.is_empty() {
                    None
                } else {
                    Some(Reference::Concrete {
                        id,
                        size_hint,
                        location_hints,
                        provenance,
                    })
                }
            }
            other => Some(other),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn prov() -> Provenance {
        Provenance {
            task_id: "t0".into(),
            output_index: 0,
        }
    }

    fn concrete(id: ReferenceId, hosts: &[&str]) -> Reference {
        Reference::Concrete {
            id,
            size_hint: None,
            location_hints: hosts.iter().map(|h| (h.to_string(), "store".into())).collect(),
            provenance: prov(),
        }
    }

    #[test]
    fn combine_unions_location_hints() {
        let a = concrete(1, &["w0"]);
        let b = concrete(1, &["w1"]);
        let combined = a.combine_with(b);
        match combined {
            Reference::Concrete { location_hints, .. } => {
                assert_eq!(location_hints.len(), 2);
                assert!(location_hints.contains_key("w0"));
                assert!(location_hints.contains_key("w1"));
            }
            _ => panic!("expected Concrete"),
        }
    }

    #[test]
    fn dropping_every_endpoint_signals_degrade_to_future() {
        let a = concrete(1, &["w0"]);
        let remaining = a.without_endpoints(&["w0".to_string()]);
        assert!(remaining.is_none());
    }

    #[test]
    fn dropping_some_endpoints_keeps_reference_concrete() {
        let a = concrete(1, &["w0", "w1"]);
        let remaining = a.without_endpoints(&["w0".to_string()]).unwrap();
        match remaining {
            Reference::Concrete { location_hints, .. } => {
                assert_eq!(location_hints.len(), 1);
                assert!(location_hints.contains_key("w1"));
            }
            _ => panic!("expected Concrete"),
        }
    }

    #[test]
    fn as_future_preserves_id_and_provenance() {
        let a = concrete(7, &["w0"]);
        let f = a.as_future();
        assert_eq!(f.id(), 7);
        assert!(f.is_future());
    }
}
