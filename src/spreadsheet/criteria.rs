use crate::error::SheetPushError;
use glob::Pattern;

/// Selects which workbook tabs are ingested.
#[derive(Clone, Debug, Default)]
pub(crate) struct Criteria {
    /// Tab name patterns; `None` accepts every tab
    pub(crate) sheet_name_patterns: Option<Vec<Pattern>>,
}

impl Criteria {
    /// Compiles glob patterns; an empty list selects everything.
    pub(crate) fn new(patterns: &[String]) -> Result<Criteria, SheetPushError> {
        let patterns = patterns
            .iter()
            .map(|pattern| Pattern::new(pattern))
            .collect::<Result<Vec<Pattern>, _>>()?;
        Ok(Criteria {
            sheet_name_patterns: Some(patterns).filter(|patterns| !patterns.is_empty()),
        })
    }

    /// Checks if a sheet name matches the criteria patterns.
    /// Returns true if no patterns are specified or if name matches any pattern.
    pub(crate) fn accept(&self, sheet_name: &str) -> bool {
        match &self.sheet_name_patterns {
            Some(patterns) => patterns.iter().any(|pattern| pattern.matches(sheet_name)),
            None => true,
        }
    }
}
