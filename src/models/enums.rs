use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

str_enum!(Route {
    Oral => "oral",
    Intravenous => "iv",
    Intramuscular => "im",
    Subcutaneous => "subcutaneous",
    Topical => "topical",
    Inhalation => "inhalation",
    Rectal => "rectal",
});

str_enum!(Frequency {
    OnceDaily => "once_daily",
    TwiceDaily => "twice_daily",
    ThreeTimesDaily => "three_times_daily",
    FourTimesDaily => "four_times_daily",
    Every4Hours => "q4h",
    Every6Hours => "q6h",
    Every8Hours => "q8h",
    Every12Hours => "q12h",
    AsNeeded => "prn",
    Continuous => "continuous",
});

str_enum!(MedicationCategory {
    Prn => "prn",
    Scheduled => "scheduled",
    Continuous => "continuous",
    Diabetic => "diabetic",
});

str_enum!(OrderStatus {
    Active => "active",
    Discontinued => "discontinued",
});

str_enum!(AdministrationOutcome {
    Success => "success",
    OverriddenMismatch => "overridden_mismatch",
    OverriddenEarly => "overridden_early",
    Cancelled => "cancelled",
});

str_enum!(DoseStatus {
    NotDue => "not_due",
    Due => "due",
    Overdue => "overdue",
    Critical => "critical",
});

impl Frequency {
    /// Number of administration times-of-day this pattern requires.
    /// `None` for PRN and continuous, which carry at most one nominal anchor.
    pub fn dose_count(&self) -> Option<usize> {
        match self {
            Self::OnceDaily => Some(1),
            Self::TwiceDaily | Self::Every12Hours => Some(2),
            Self::ThreeTimesDaily | Self::Every8Hours => Some(3),
            Self::FourTimesDaily | Self::Every6Hours => Some(4),
            Self::Every4Hours => Some(6),
            Self::AsNeeded | Self::Continuous => None,
        }
    }

    /// Fixed dosing interval in hours, for the every-N-hours patterns.
    pub fn interval_hours(&self) -> Option<i64> {
        match self {
            Self::Every4Hours => Some(4),
            Self::Every6Hours => Some(6),
            Self::Every8Hours => Some(8),
            Self::Every12Hours => Some(12),
            _ => None,
        }
    }
}

impl Route {
    /// Parse the spellings printed on pharmacy labels ("PO", "IV", "SC", "SubQ", ...).
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "oral" | "po" | "by mouth" => Some(Self::Oral),
            "iv" | "intravenous" => Some(Self::Intravenous),
            "im" | "intramuscular" => Some(Self::Intramuscular),
            "sc" | "sq" | "subq" | "subcut" | "subcutaneous" => Some(Self::Subcutaneous),
            "top" | "topical" => Some(Self::Topical),
            "inh" | "inhaled" | "inhalation" => Some(Self::Inhalation),
            "pr" | "rectal" => Some(Self::Rectal),
            _ => None,
        }
    }
}
