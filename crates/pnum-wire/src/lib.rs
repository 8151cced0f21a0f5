#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

pub mod codec;
pub mod message;

use pnum_core::types::{self as core, HostId};
use thiserror::Error;

pub use codec::{decode, encode, DecodeError, EncodeError, LineBuffer};
pub use message::{Body, Message, Origin};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConvertError {
    #[error("expected a `{expected}` message, got `{got}`")]
    UnexpectedType {
        expected: &'static str,
        got: &'static str,
    },
    #[error("search space exhausted")]
    Exhausted,
    #[error(transparent)]
    Range(#[from] core::RangeError),
}

pub trait ToWire<T> {
    fn to_wire(&self) -> T;
}

pub trait TryToCore<T> {
    type Error;
    fn try_to_core(&self) -> Result<T, Self::Error>;
}

impl ToWire<Body> for core::WorkRange {
    fn to_wire(&self) -> Body {
        Body::Rng {
            min: self.start,
            max: self.end,
        }
    }
}

impl TryToCore<core::WorkRange> for Body {
    type Error = ConvertError;

    fn try_to_core(&self) -> Result<core::WorkRange, Self::Error> {
        match self {
            Body::Rng { min: 0, max: 0 } => Err(ConvertError::Exhausted),
            Body::Rng { min, max } => Ok(core::WorkRange::new(*min, *max)?),
            other => Err(ConvertError::UnexpectedType {
                expected: "rng",
                got: other.kind(),
            }),
        }
    }
}

impl ToWire<Body> for core::StatusSnapshot {
    fn to_wire(&self) -> Body {
        Body::Dat {
            clients: self
                .clients
                .iter()
                .map(|(host, flops)| (host.0.clone(), *flops))
                .collect(),
            perfs: self.discovered.clone(),
        }
    }
}

impl TryToCore<core::StatusSnapshot> for Body {
    type Error = ConvertError;

    fn try_to_core(&self) -> Result<core::StatusSnapshot, Self::Error> {
        let Body::Dat { clients, perfs } = self else {
            return Err(ConvertError::UnexpectedType {
                expected: "dat",
                got: self.kind(),
            });
        };
        let mut discovered = perfs.clone();
        discovered.sort_unstable();
        discovered.dedup();
        Ok(core::StatusSnapshot {
            clients: clients
                .iter()
                .map(|(host, flops)| (HostId(host.clone()), *flops))
                .collect(),
            discovered,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rng_requires_ordered_bounds() {
        let err = TryToCore::<core::WorkRange>::try_to_core(&Body::Rng { min: 9, max: 3 })
            .unwrap_err();
        assert_eq!(
            err,
            ConvertError::Range(core::RangeError::Inverted { start: 9, end: 3 })
        );
    }

    #[test]
    fn exhausted_sentinel_is_not_a_range() {
        let err =
            TryToCore::<core::WorkRange>::try_to_core(&Body::EXHAUSTED_RANGE).unwrap_err();
        assert_eq!(err, ConvertError::Exhausted);
    }

    #[test]
    fn snapshot_roundtrip_core_wire() {
        let mut snap = core::StatusSnapshot::default();
        snap.clients.insert(HostId("10.0.0.7".to_string()), 1.5e9);
        snap.discovered = vec![6, 28, 496];

        let body = snap.to_wire();
        let decoded = TryToCore::<core::StatusSnapshot>::try_to_core(&body).unwrap();
        assert_eq!(decoded, snap);
    }

    #[test]
    fn snapshot_from_wrong_type_is_rejected() {
        let err = TryToCore::<core::StatusSnapshot>::try_to_core(&Body::Kill).unwrap_err();
        assert_eq!(
            err,
            ConvertError::UnexpectedType {
                expected: "dat",
                got: "kill"
            }
        );
    }
}
