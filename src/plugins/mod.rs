//! External collaborators: the ledger, the content store and the scoring oracle, each a
//! trait with a local and a remote implementation.

pub mod content_store;
pub mod ledger;
pub mod oracle;
pub mod rpc_ledger;
pub mod sqlite_ledger;
