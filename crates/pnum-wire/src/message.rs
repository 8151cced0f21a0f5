//! Wire records exchanged between the manager and its peers.
//!
//! One JSON object per line: `{"orig": <origin>, "type": <kind>, ...fields}`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Origin {
    #[serde(rename = "man", alias = "manager")]
    Manager,
    #[serde(rename = "cmp", alias = "compute")]
    Compute,
    #[serde(rename = "cmp_mon", alias = "monitor")]
    Monitor,
    #[serde(rename = "rep", alias = "report")]
    Report,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Origin::Manager => "man",
            Origin::Compute => "cmp",
            Origin::Monitor => "cmp_mon",
            Origin::Report => "rep",
        };
        f.write_str(name)
    }
}

/// Message payload, discriminated by the `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Body {
    Ack {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        flops: Option<f64>,
    },
    Req {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        flops: Option<f64>,
    },
    Rng {
        min: u64,
        max: u64,
    },
    Add {
        val: u64,
    },
    Dat {
        clients: BTreeMap<String, f64>,
        perfs: Vec<u64>,
    },
    Kill,
}

impl Body {
    /// Reply to a work request once the search space is used up.
    pub const EXHAUSTED_RANGE: Body = Body::Rng { min: 0, max: 0 };

    pub fn kind(&self) -> &'static str {
        match self {
            Body::Ack { .. } => "ack",
            Body::Req { .. } => "req",
            Body::Rng { .. } => "rng",
            Body::Add { .. } => "add",
            Body::Dat { .. } => "dat",
            Body::Kill => "kill",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "orig", alias = "origin")]
    pub origin: Origin,
    #[serde(flatten)]
    pub body: Body,
}

impl Message {
    pub fn new(origin: Origin, body: Body) -> Self {
        Self { origin, body }
    }

    pub fn manager(body: Body) -> Self {
        Self::new(Origin::Manager, body)
    }

    pub fn compute(body: Body) -> Self {
        Self::new(Origin::Compute, body)
    }

    pub fn monitor(body: Body) -> Self {
        Self::new(Origin::Monitor, body)
    }

    pub fn report(body: Body) -> Self {
        Self::new(Origin::Report, body)
    }

    pub fn kind(&self) -> &'static str {
        self.body.kind()
    }
}
