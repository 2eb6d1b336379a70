//! Kontragent (billing entity) identity rules.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

static INN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{9}$").expect("inn regex is valid"));
static PINFL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{14}$").expect("pinfl regex is valid"));

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KontragentError {
    #[error("name must be non-empty")]
    BlankName,
    #[error("pinfl is required for an individual entrepreneur")]
    MissingPinfl,
    #[error("inn is required for a legal entity")]
    MissingInn,
    #[error("inn must be exactly 9 digits")]
    InvalidInn,
    #[error("pinfl must be exactly 14 digits")]
    InvalidPinfl,
    #[error("unknown ownership form '{0}'")]
    UnknownOwnershipForm(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OwnershipForm {
    #[serde(rename = "Индивидуальный предприниматель")]
    IndividualEntrepreneur,
    #[serde(rename = "Юридическое лицо")]
    LegalEntity,
    #[serde(rename = "Обособленное подразделение юридического лица")]
    LegalEntitySubdivision,
}

impl OwnershipForm {
    /// The label stored in the database and shown to clients.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            OwnershipForm::IndividualEntrepreneur => "Индивидуальный предприниматель",
            OwnershipForm::LegalEntity => "Юридическое лицо",
            OwnershipForm::LegalEntitySubdivision => {
                "Обособленное подразделение юридического лица"
            }
        }
    }

    /// Individual entrepreneurs are identified by PINFL, legal entities by INN.
    #[must_use]
    pub fn requires_inn(self) -> bool {
        !matches!(self, OwnershipForm::IndividualEntrepreneur)
    }
}

impl std::fmt::Display for OwnershipForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OwnershipForm {
    type Err = KontragentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            OwnershipForm::IndividualEntrepreneur,
            OwnershipForm::LegalEntity,
            OwnershipForm::LegalEntitySubdivision,
        ]
        .into_iter()
        .find(|form| form.as_str() == s)
        .ok_or_else(|| KontragentError::UnknownOwnershipForm(s.to_string()))
    }
}

/// Validated identity fields of a kontragent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KontragentIdentity {
    pub ownership_form: OwnershipForm,
    pub name: String,
    pub inn: Option<String>,
    pub pinfl: Option<String>,
}

impl KontragentIdentity {
    /// Trim inputs, treat blanks as absent, and apply the ownership-form rules.
    ///
    /// # Errors
    ///
    /// Returns a [`KontragentError`] describing the first failed rule.
    pub fn new(
        ownership_form: OwnershipForm,
        name: &str,
        inn: Option<&str>,
        pinfl: Option<&str>,
    ) -> Result<Self, KontragentError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(KontragentError::BlankName);
        }

        let clean = |v: Option<&str>| {
            v.map(|s| s.split_whitespace().collect::<String>())
                .filter(|s| !s.is_empty())
        };
        let inn = clean(inn);
        let pinfl = clean(pinfl);

        if ownership_form.requires_inn() {
            if inn.is_none() {
                return Err(KontragentError::MissingInn);
            }
        } else if pinfl.is_none() {
            return Err(KontragentError::MissingPinfl);
        }

        if inn.as_deref().is_some_and(|v| !INN_RE.is_match(v)) {
            return Err(KontragentError::InvalidInn);
        }
        if pinfl.as_deref().is_some_and(|v| !PINFL_RE.is_match(v)) {
            return Err(KontragentError::InvalidPinfl);
        }

        Ok(Self {
            ownership_form,
            name: name.to_string(),
            inn,
            pinfl,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entrepreneur_requires_pinfl() {
        let err = KontragentIdentity::new(
            OwnershipForm::IndividualEntrepreneur,
            "ИП Каримов",
            Some("123456789"),
            None,
        )
        .unwrap_err();
        assert_eq!(err, KontragentError::MissingPinfl);
    }

    #[test]
    fn legal_entity_requires_inn() {
        for form in [OwnershipForm::LegalEntity, OwnershipForm::LegalEntitySubdivision] {
            let err = KontragentIdentity::new(form, "ООО Ромашка", None, Some("12345678901234"))
                .unwrap_err();
            assert_eq!(err, KontragentError::MissingInn);
        }
    }

    #[test]
    fn identity_normalizes_whitespace() {
        let identity = KontragentIdentity::new(
            OwnershipForm::LegalEntity,
            "  ООО Ромашка ",
            Some(" 123 456 789 "),
            Some("   "),
        )
        .unwrap();
        assert_eq!(identity.name, "ООО Ромашка");
        assert_eq!(identity.inn.as_deref(), Some("123456789"));
        assert!(identity.pinfl.is_none());
    }

    #[test]
    fn identity_rejects_malformed_numbers() {
        assert_eq!(
            KontragentIdentity::new(OwnershipForm::LegalEntity, "A", Some("12345"), None),
            Err(KontragentError::InvalidInn)
        );
        assert_eq!(
            KontragentIdentity::new(
                OwnershipForm::IndividualEntrepreneur,
                "B",
                None,
                Some("1234567890123x")
            ),
            Err(KontragentError::InvalidPinfl)
        );
    }

    #[test]
    fn identity_accepts_only_ascii_digits() {
        assert_eq!(
            KontragentIdentity::new(OwnershipForm::LegalEntity, "A", Some("١٢٣٤٥٦٧٨٩"), None),
            Err(KontragentError::InvalidInn)
        );
        assert_eq!(
            KontragentIdentity::new(
                OwnershipForm::IndividualEntrepreneur,
                "B",
                None,
                Some("１２３４５６７８９０１２３４")
            ),
            Err(KontragentError::InvalidPinfl)
        );
    }

    #[test]
    fn identity_rejects_blank_name() {
        assert_eq!(
            KontragentIdentity::new(OwnershipForm::LegalEntity, " ", Some("123456789"), None),
            Err(KontragentError::BlankName)
        );
    }

    #[test]
    fn ownership_form_round_trips_through_label() {
        let form: OwnershipForm = "Юридическое лицо".parse().unwrap();
        assert_eq!(form, OwnershipForm::LegalEntity);
        assert_eq!(
            serde_json::to_string(&OwnershipForm::IndividualEntrepreneur).unwrap(),
            "\"Индивидуальный предприниматель\""
        );
        assert!("ООО".parse::<OwnershipForm>().is_err());
    }
}
