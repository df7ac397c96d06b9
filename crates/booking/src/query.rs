use chrono::NaiveDate;
use seat_store::{LifecycleState, ResourceQuery};

/// 1-based page selection. Defaults to the first page of ten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: usize,
    pub per_page: usize,
}

impl PageRequest {
    pub fn new(page: usize, per_page: usize) -> Self {
        Self {
            page: page.max(1),
            per_page,
        }
    }

    pub fn limit(&self) -> usize {
        self.per_page
    }

    pub fn offset(&self) -> usize {
        (self.page.max(1) - 1) * self.per_page
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, 10)
    }
}

/// Restricts listings by scheduled time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFilter {
    /// Scheduled at or after the current time.
    Upcoming,
    /// Scheduled within the given UTC day.
    On(NaiveDate),
}

/// Filter for catalog listings.
#[derive(Debug, Clone, Default)]
pub struct ResourceFilter {
    pub state: Option<LifecycleState>,
    pub location: Option<String>,
    pub date: Option<DateFilter>,
    pub page: PageRequest,
}

impl ResourceFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(mut self, state: LifecycleState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn upcoming(mut self) -> Self {
        self.date = Some(DateFilter::Upcoming);
        self
    }

    pub fn on(mut self, day: NaiveDate) -> Self {
        self.date = Some(DateFilter::On(day));
        self
    }

    pub fn page(mut self, page: PageRequest) -> Self {
        self.page = page;
        self
    }

    /// Returns true if only resources scheduled from the current time on are wanted.
    pub(crate) fn is_upcoming(&self) -> bool {
        matches!(self.date, Some(DateFilter::Upcoming))
    }

    /// Translates to a store query. The lower bound of an upcoming filter
    /// depends on the store's clock and is left for the caller to set.
    pub(crate) fn to_query(&self) -> ResourceQuery {
        let mut query = ResourceQuery::new()
            .limit(self.page.limit())
            .offset(self.page.offset());

        if let Some(state) = self.state {
            query = query.state(state);
        }
        if let Some(ref location) = self.location {
            query = query.location(location.clone());
        }
        if let Some(DateFilter::On(day)) = self.date {
            let start = day.and_time(chrono::NaiveTime::MIN).and_utc();
            query = query
                .scheduled_from(start)
                .scheduled_before(start + chrono::Duration::days(1));
        }

        query
    }
}
