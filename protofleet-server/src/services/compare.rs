use protofleet_core::protocol::CompareReport;
use protofleet_core::{Ledger, Manifest};

/// Classify every manifest record against the ledger.
///
/// Paths the ledger does not know are `additional`; known paths without a
/// tag are reported as errors, the rest are `matched` or `unmatched`.
pub async fn compare(ledger: &Ledger, manifest: &Manifest) -> CompareReport {
    let mut report = CompareReport::default();

    for record in manifest.records() {
        let path = record.path.as_str();
        let Ok(digest) = ledger.digest_of(path).await else {
            report.additional.push(path.to_string());
            continue;
        };

        if record.tag.is_empty() {
            report.errors.insert(
                path.to_string(),
                format!("should specify digest for file \"{}\".", path),
            );
        } else if record.tag == digest {
            report.matched += 1;
        } else {
            report.unmatched.push(path.to_string());
        }
    }

    report
}
