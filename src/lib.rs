//! Certification scenario runner for payment gateway APIs.
//!
//! Scenarios are replayed in order. Bodies may reference earlier results
//! (`#{L_AC_1.Transaction.TransactionID}`) or values from an external
//! tokenization flow (`${eProtect.visa_valid}`); both are resolved just
//! before each request is sent.

pub mod cache;
pub mod config;
pub mod error;
pub mod executor;
pub mod model;
pub mod resolver;
pub mod runner;
pub mod sink;
pub mod source;

pub use cache::*;
pub use config::*;
pub use error::{CertError, Result};
pub use executor::*;
pub use model::*;
pub use resolver::*;
pub use runner::*;
pub use sink::*;
pub use source::*;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fixture_file_deserialization() {
        let fixture: FixtureFile = serde_json::from_str(
            r##"{"endpoint":"CAPTURE","body":{"Transaction":{"TransactionID":"#{L_AC_1.Transaction.TransactionID}"}}}"##,
        )
        .unwrap();

        assert_eq!(fixture.endpoint, "CAPTURE");
        assert_eq!(
            fixture.body,
            json!({"Transaction": {"TransactionID": "#{L_AC_1.Transaction.TransactionID}"}})
        );
    }
}
