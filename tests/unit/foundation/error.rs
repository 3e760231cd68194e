use super::*;

#[test]
fn display_prefixes_are_stable() {
    assert!(
        OitError::missing_capability("x")
            .to_string()
            .contains("missing capability:")
    );
    assert!(
        OitError::validation("x")
            .to_string()
            .contains("validation error:")
    );
    assert!(
        OitError::config("x")
            .to_string()
            .contains("configuration error:")
    );
}

#[test]
fn allocation_error_reports_sizes() {
    let err = OitError::Allocation {
        label: "kbuffer.records".to_owned(),
        requested: 4096,
        limit: 1024,
    };
    let msg = err.to_string();
    assert!(msg.contains("kbuffer.records"));
    assert!(msg.contains("4096"));
    assert!(msg.contains("1024"));
}

#[test]
fn other_preserves_source() {
    let base = std::io::Error::other("boom");
    let err = OitError::Other(anyhow::Error::new(base));
    assert!(err.to_string().contains("boom"));
}
