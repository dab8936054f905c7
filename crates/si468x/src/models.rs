//! Si468x part definitions.
//!
//! Every member of the family boots the same way and speaks the same command
//! set; they differ in which receiver images the silicon supports.
//!
//! | Part   | AM  | FM  | HD  | DAB |
//! |--------|-----|-----|-----|-----|
//! | Si4682 |     | yes | yes |     |
//! | Si4683 | yes | yes | yes |     |
//! | Si4684 |     | yes |     | yes |
//! | Si4688 |     | yes | yes | yes |
//! | Si4689 | yes | yes | yes | yes |

use std::fmt;
use std::str::FromStr;

use si468x_core::Function;

/// A member of the Si468x family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Model {
    Si4682,
    Si4683,
    Si4684,
    Si4688,
    Si4689,
}

const ALL_MODELS: &[Model] = &[
    Model::Si4682,
    Model::Si4683,
    Model::Si4684,
    Model::Si4688,
    Model::Si4689,
];

impl Model {
    /// Part number as reported by GET_PART_INFO (e.g. 4689).
    pub fn part_number(&self) -> u16 {
        match self {
            Model::Si4682 => 4682,
            Model::Si4683 => 4683,
            Model::Si4684 => 4684,
            Model::Si4688 => 4688,
            Model::Si4689 => 4689,
        }
    }

    pub fn has_am(&self) -> bool {
        matches!(self, Model::Si4683 | Model::Si4689)
    }

    pub fn has_hd(&self) -> bool {
        !matches!(self, Model::Si4684)
    }

    pub fn has_dab(&self) -> bool {
        matches!(self, Model::Si4684 | Model::Si4688 | Model::Si4689)
    }

    /// Whether this part can run the given receiver function.
    pub fn supports(&self, function: Function) -> bool {
        match function {
            Function::Am => self.has_am(),
            Function::Dab => self.has_dab(),
            Function::Fm | Function::MiniBoot | Function::Bootloader => true,
        }
    }

    /// Look up a model by its part number.
    pub fn from_part_number(part: u16) -> Option<Model> {
        ALL_MODELS.iter().copied().find(|m| m.part_number() == part)
    }

    pub fn all() -> &'static [Model] {
        ALL_MODELS
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Si{}", self.part_number())
    }
}

/// Error returned when a string does not name a known part.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown Si468x model: '{0}'")]
pub struct ParseModelError(String);

impl FromStr for Model {
    type Err = ParseModelError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        let digits = lower.strip_prefix("si").unwrap_or(&lower);
        digits
            .parse::<u16>()
            .ok()
            .and_then(Model::from_part_number)
            .ok_or_else(|| ParseModelError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities() {
        assert!(Model::Si4689.has_am());
        assert!(Model::Si4683.has_am());
        assert!(!Model::Si4684.has_am());
        assert!(!Model::Si4684.has_hd());
        assert!(Model::Si4688.has_hd());
        assert!(!Model::Si4682.has_dab());
        assert!(Model::Si4684.has_dab());
    }

    #[test]
    fn supports_function() {
        assert!(!Model::Si4684.supports(Function::Am));
        assert!(Model::Si4684.supports(Function::Fm));
        assert!(!Model::Si4683.supports(Function::Dab));
        assert!(Model::Si4689.supports(Function::Am));
    }

    #[test]
    fn part_number_lookup() {
        assert_eq!(Model::from_part_number(4683), Some(Model::Si4683));
        assert_eq!(Model::from_part_number(4685), None);
    }

    #[test]
    fn parse_names() {
        assert_eq!("Si4688".parse::<Model>().unwrap(), Model::Si4688);
        assert_eq!("si4682".parse::<Model>().unwrap(), Model::Si4682);
        assert_eq!("4689".parse::<Model>().unwrap(), Model::Si4689);
        let err = "Si4703".parse::<Model>().unwrap_err();
        assert_eq!(err.to_string(), "unknown Si468x model: 'Si4703'");
    }

    #[test]
    fn display() {
        assert_eq!(Model::Si4684.to_string(), "Si4684");
    }
}
