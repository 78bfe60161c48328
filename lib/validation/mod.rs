use crate::vrp::VrpRecord;
use ipnetwork::IpNetwork;
use serde::ser::{Serialize, SerializeStruct, Serializer};

/// Outcome of RFC 6811 §2.1 origin validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpkiStatus {
    Valid,
    Invalid(InvalidReason),
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    MoreSpecific,
    NoMatchingOrigin,
}

impl InvalidReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MoreSpecific => "moreSpecific",
            Self::NoMatchingOrigin => "noMatchingOrigin",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::MoreSpecific => {
                "Covering VRP with matching origin ASN found, but queried prefix is more specific \
                 than maxLength attribute allows."
            }
            Self::NoMatchingOrigin => "No covering VRP with matching origin ASN found.",
        }
    }
}

// Wire shape: {"status": ..., "reason": {"code": ..., "description": ...}},
// with "reason" only present for Invalid.
impl Serialize for RpkiStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Valid => {
                let mut s = serializer.serialize_struct("RpkiStatus", 1)?;
                s.serialize_field("status", "Valid")?;
                s.end()
            }
            Self::NotFound => {
                let mut s = serializer.serialize_struct("RpkiStatus", 1)?;
                s.serialize_field("status", "NotFound")?;
                s.end()
            }
            Self::Invalid(reason) => {
                #[derive(serde::Serialize)]
                struct Reason {
                    code: &'static str,
                    description: &'static str,
                }
                let mut s = serializer.serialize_struct("RpkiStatus", 2)?;
                s.serialize_field("status", "Invalid")?;
                s.serialize_field(
                    "reason",
                    &Reason {
                        code: reason.code(),
                        description: reason.description(),
                    },
                )?;
                s.end()
            }
        }
    }
}

/// RFC 6811 §2.1 route origin validation against a covering set.
///
/// Pure function of its inputs; the caller supplies the covering VRPs for the
/// queried prefix and point in time. ASN 0 on a VRP never matches any origin
/// ("no AS" marker). Any single covering VRP with a matching origin and a
/// permissive enough max length makes the announcement Valid.
pub fn validate_origin(covering: &[VrpRecord], prefix: &IpNetwork, asn: u32) -> RpkiStatus {
    if covering.is_empty() {
        return RpkiStatus::NotFound;
    }
    let mut same_origin_found = false;
    for rec in covering {
        if rec.vrp.asn == 0 || rec.vrp.asn != asn {
            continue;
        }
        same_origin_found = true;
        if prefix.prefix() <= rec.vrp.max_length {
            return RpkiStatus::Valid;
        }
    }
    if same_origin_found {
        RpkiStatus::Invalid(InvalidReason::MoreSpecific)
    } else {
        RpkiStatus::Invalid(InvalidReason::NoMatchingOrigin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vrp::Vrp;
    use chrono::{TimeZone, Utc};

    fn net(s: &str) -> IpNetwork {
        s.parse().unwrap()
    }

    fn covering(entries: &[(&str, u32, u8)]) -> Vec<VrpRecord> {
        entries
            .iter()
            .enumerate()
            .map(|(i, (prefix, asn, max_length))| VrpRecord {
                id: i as i64,
                vrp: Vrp::new(net(prefix), *asn, *max_length),
                trust_anchor: None,
                visible_from: Utc.timestamp_opt(0, 0).unwrap(),
                visible_to: None,
            })
            .collect()
    }

    #[test]
    fn valid_when_origin_matches_and_length_allows() {
        let set = covering(&[("10.0.0.0/23", 65001, 24)]);
        assert_eq!(
            validate_origin(&set, &net("10.0.0.0/24"), 65001),
            RpkiStatus::Valid
        );
    }

    #[test]
    fn invalid_more_specific_when_max_length_exceeded() {
        let set = covering(&[("10.0.0.0/23", 65001, 22)]);
        assert_eq!(
            validate_origin(&set, &net("10.0.0.0/24"), 65001),
            RpkiStatus::Invalid(InvalidReason::MoreSpecific)
        );
    }

    #[test]
    fn invalid_no_matching_origin_for_other_asn() {
        let set = covering(&[("10.0.0.0/23", 65002, 24)]);
        assert_eq!(
            validate_origin(&set, &net("10.0.0.0/24"), 65001),
            RpkiStatus::Invalid(InvalidReason::NoMatchingOrigin)
        );
    }

    #[test]
    fn not_found_for_empty_covering_set() {
        assert_eq!(
            validate_origin(&[], &net("10.0.0.0/24"), 65001),
            RpkiStatus::NotFound
        );
    }

    #[test]
    fn asn_zero_never_matches() {
        let set = covering(&[("10.0.0.0/23", 0, 24)]);
        assert_eq!(
            validate_origin(&set, &net("10.0.0.0/24"), 0),
            RpkiStatus::Invalid(InvalidReason::NoMatchingOrigin)
        );
    }

    #[test]
    fn first_match_wins_across_mixed_covering_set() {
        let set = covering(&[
            ("10.0.0.0/23", 65002, 24),
            ("10.0.0.0/23", 65001, 22),
            ("10.0.0.0/16", 65001, 24),
        ]);
        assert_eq!(
            validate_origin(&set, &net("10.0.0.0/24"), 65001),
            RpkiStatus::Valid
        );
    }

    #[test]
    fn serializes_reason_only_for_invalid() {
        let valid = serde_json::to_value(RpkiStatus::Valid).unwrap();
        assert_eq!(valid, serde_json::json!({"status": "Valid"}));

        let invalid =
            serde_json::to_value(RpkiStatus::Invalid(InvalidReason::NoMatchingOrigin)).unwrap();
        assert_eq!(invalid["status"], "Invalid");
        assert_eq!(invalid["reason"]["code"], "noMatchingOrigin");
    }
}
