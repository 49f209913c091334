//! Clients for the clash rule management and results analysis services
//!
//! Two variants implement [`ClashServiceClient`]:
//! - [`RcClient`]: typed requests, query-parameter paging, lazy page stream
//! - [`WsgClient`]: hand-built URLs and headers, manual continuation loops
//!
//! [`ClashDetectionManager`] provides the higher-level operations on top of
//! either one.

mod client;
mod error;
pub mod lenient;
mod manager;
pub mod rc;
mod token;
pub mod wsg;

pub use client::{
    ClashServiceClient, ClientKind, ContextIds, ServiceEndpoints, CLASH_RULE_TEMPLATE_TYPE,
    RAS_DEFAULT_PAGE_SIZE, RMS_DEFAULT_PAGE_SIZE, RULE_TEMPLATE_PAGE_SIZE,
    SUPPRESSION_HISTORY_TOP,
};
pub use error::{ClientError, ClientResult};
pub use manager::{BulkRun, ClashDetectionManager};
pub use rc::RcClient;
pub use token::{authorization_value, AccessTokenProvider, StaticToken};
pub use wsg::WsgClient;
