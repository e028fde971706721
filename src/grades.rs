use std::fmt;

/// The five grade symbols a student record may carry. A missing slot
/// (NULL in storage, absent on the wire) means "not yet graded".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradeSymbol {
    Five,
    Four,
    Three,
    Two,
    /// Excused absence ("н"). Recorded, but worth zero points.
    Absent,
}

impl GradeSymbol {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Five => "5",
            Self::Four => "4",
            Self::Three => "3",
            Self::Two => "2",
            Self::Absent => "н",
        }
    }

    pub fn points(self) -> i64 {
        match self {
            Self::Five => 5,
            Self::Four => 4,
            Self::Three => 3,
            Self::Two => 2,
            Self::Absent => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GradeParseError {
    pub raw: String,
}

impl fmt::Display for GradeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid grade \"{}\": expected one of 5, 4, 3, 2, н",
            self.raw
        )
    }
}

impl std::error::Error for GradeParseError {}

/// Strict parse for input boundaries. Null and whitespace-only input
/// mean "no grade"; anything else must be one of the five symbols.
///
/// Not for stored values: reads go through [`points_of`], which must
/// keep tolerating rows written before the symbol set was enforced.
pub fn parse_grade_symbol(raw: Option<&str>) -> Result<Option<GradeSymbol>, GradeParseError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let cleaned = raw.trim();
    if cleaned.is_empty() {
        return Ok(None);
    }
    match cleaned {
        "5" => Ok(Some(GradeSymbol::Five)),
        "4" => Ok(Some(GradeSymbol::Four)),
        "3" => Ok(Some(GradeSymbol::Three)),
        "2" => Ok(Some(GradeSymbol::Two)),
        "н" => Ok(Some(GradeSymbol::Absent)),
        other => Err(GradeParseError {
            raw: other.to_string(),
        }),
    }
}

/// Permissive mapping for already-stored values: unknown symbols score
/// zero instead of failing, so reads survive historical data drift.
pub fn points_of(raw: Option<&str>) -> i64 {
    let Some(raw) = raw else {
        return 0;
    };
    match raw.trim() {
        "5" => 5,
        "4" => 4,
        "3" => 3,
        "2" => 2,
        _ => 0,
    }
}

/// Total points over a student's grade slots. Missing slots count 0.
pub fn total_score<'a, I>(slots: I) -> i64
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    slots.into_iter().map(points_of).sum()
}

/// A student is admitted when their total meets the group's control
/// sum. Ties admit.
pub fn is_admitted(total: i64, control_sum: i64) -> bool {
    total >= control_sum
}
