use crate::models::record::TargetRecord;

/// Decides whether a record still needs a job's transformation.
///
/// Must be a pure function of the record. Failure markers written by the
/// engine are not consulted, so failed records stay eligible.
pub trait EligibilityFilter: Send + Sync {
    fn is_eligible(&self, record: &TargetRecord) -> bool;
}

impl<F> EligibilityFilter for F
where
    F: Fn(&TargetRecord) -> bool + Send + Sync,
{
    fn is_eligible(&self, record: &TargetRecord) -> bool {
        self(record)
    }
}

/// Eligible records of a page, in page order, capped at `quota`.
pub fn select<'a>(
    records: &'a [TargetRecord],
    filter: &dyn EligibilityFilter,
    quota: usize,
) -> Selection<'a> {
    let mut eligible = records.iter().filter(|r| filter.is_eligible(r));
    let chosen: Vec<&TargetRecord> = eligible.by_ref().take(quota).collect();
    let truncated = eligible.next().is_some();
    Selection { chosen, truncated }
}

#[derive(Debug)]
pub struct Selection<'a> {
    pub chosen: Vec<&'a TargetRecord>,
    /// More eligible records remain on the page beyond the quota.
    pub truncated: bool,
}
