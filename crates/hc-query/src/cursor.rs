use std::sync::Arc;

use hc_types::{Attributes, DataOid, MetadataOid, QueryIntegrityTime};
use serde::{Deserialize, Serialize};

use crate::error::{QueryError, QueryResult};
use crate::index::QueryIndex;
use crate::predicate::Predicate;

/// One query result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryRow {
    pub oid: MetadataOid,
    pub data_oid: DataOid,
    pub attributes: Attributes,
    /// Every live object committed at or before this time was eligible for
    /// this row's page.
    pub query_integrity_time: QueryIntegrityTime,
}

/// A paginated scan in OID order.
///
/// Each page is evaluated against the index as it is when the page is
/// fetched. The QIT reported with a page is the minimum of the previous
/// page's QIT and the current index watermark, so it never increases over
/// the life of the cursor.
pub struct QueryCursor {
    index: Arc<QueryIndex>,
    predicate: Predicate,
    page_size: usize,
    last: Option<MetadataOid>,
    qit: Option<QueryIntegrityTime>,
    exhausted: bool,
}

impl std::fmt::Debug for QueryCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCursor")
            .field("predicate", &self.predicate.to_string())
            .field("page_size", &self.page_size)
            .field("last", &self.last)
            .field("qit", &self.qit)
            .field("exhausted", &self.exhausted)
            .finish()
    }
}

impl QueryCursor {
    pub(crate) fn new(
        index: Arc<QueryIndex>,
        predicate: Predicate,
        page_size: usize,
    ) -> QueryResult<Self> {
        if page_size == 0 {
            return Err(QueryError::InvalidPageSize(page_size));
        }
        Ok(Self {
            index,
            predicate,
            page_size,
            last: None,
            qit: None,
            exhausted: false,
        })
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// QIT of the most recent page; `None` before the first page.
    pub fn query_integrity_time(&self) -> Option<QueryIntegrityTime> {
        self.qit
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Fetch the next page. Empty once the scan is exhausted.
    pub fn next_page(&mut self) -> Vec<QueryRow> {
        if self.exhausted {
            return Vec::new();
        }
        let (mut rows, current) = self
            .index
            .scan(&self.predicate, self.last.as_ref(), self.page_size);
        let qit = self.qit.map_or(current, |prev| prev.min(current));
        self.qit = Some(qit);
        for row in &mut rows {
            row.query_integrity_time = qit;
        }
        if rows.len() < self.page_size {
            self.exhausted = true;
        }
        if let Some(row) = rows.last() {
            self.last = Some(row.oid);
        }
        rows
    }

    /// Drain every remaining page.
    pub fn collect_all(mut self) -> Vec<QueryRow> {
        let mut out = Vec::new();
        while !self.exhausted {
            out.extend(self.next_page());
        }
        out
    }
}
