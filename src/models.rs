/*!
Reference networks.

Small host networks implementing [`Network`](crate::learn::network::Network) for both tasks.
[`ModelKind::HNet`] adds harmonic features with learned phase offsets, [`ModelKind::Baseline`]
does without.
*/
use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

mod boundary;
mod mnist;

pub use boundary::BoundaryNet;
pub use mnist::MnistNet;

/// The network variant, selected with `--mode`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Harmonic network.
    #[default]
    #[serde(rename = "hnet")]
    HNet,
    /// Plain network.
    Baseline,
}

impl FromStr for ModelKind {
    type Err = Error;
    fn from_str(mode: &str) -> Result<Self, Error> {
        match mode {
            "hnet" => Ok(Self::HNet),
            "baseline" => Ok(Self::Baseline),
            _ => Err(Error::InvalidMode(mode.to_string())),
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::HNet => f.write_str("hnet"),
            Self::Baseline => f.write_str("baseline"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_mode() {
        assert_eq!("hnet".parse::<ModelKind>().unwrap(), ModelKind::HNet);
        assert_eq!("baseline".parse::<ModelKind>().unwrap(), ModelKind::Baseline);
        assert!(matches!(
            "vgg".parse::<ModelKind>(),
            Err(Error::InvalidMode(mode)) if mode == "vgg"
        ));
        assert_eq!(ModelKind::HNet.to_string(), "hnet");
    }
}
