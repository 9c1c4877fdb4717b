#[macro_use]
extern crate hamcrest;

use std::io::SeekFrom;

use hamcrest::prelude::*;
use scull::{
    AccessMode, AdmissionKind, Caller, ConfigField, OpenRequest, Registry, ScullConfig, ScullError,
};

fn request() -> OpenRequest {
    OpenRequest::new(AccessMode::ReadWrite, Caller::new(1000))
}

#[test]
fn test_well_known_names() {
    let registry = Registry::new(ScullConfig {
        nr_devs: 2,
        ..ScullConfig::default()
    });
    assert_that!(
        registry.names(),
        is(equal_to(vec![
            "scull0".to_string(),
            "scull1".to_string(),
            "scullpriv".to_string(),
            "scullsingle".to_string(),
            "sculluid".to_string(),
            "scullwuid".to_string(),
        ]))
    );

    let kind = |name: &str| registry.controller(name).map(|c| c.kind());
    assert_eq!(kind("scull1"), Some(AdmissionKind::Plain));
    assert_eq!(kind("scullsingle"), Some(AdmissionKind::Exclusive));
    assert_eq!(kind("sculluid"), Some(AdmissionKind::Owner));
    assert_eq!(kind("scullwuid"), Some(AdmissionKind::Gated));
    assert_eq!(kind("scullpriv"), Some(AdmissionKind::Keyed));
    assert_eq!(kind("scull2"), None);
}

#[tokio::test]
async fn test_open_unknown_device() {
    let registry = Registry::default();
    let err = registry.open("nosuchdev", request()).await.unwrap_err();
    assert_eq!(err, ScullError::NotFound("nosuchdev".to_string()));
    assert_eq!(err.errno(), scull::error::ENODEV);
}

#[tokio::test]
async fn test_new_device_uses_configured_defaults() {
    let registry = Registry::new(ScullConfig {
        quantum: 16,
        qset: 8,
        ..ScullConfig::default()
    });
    let session = registry.open("scull3", request()).await.unwrap();
    assert_eq!(session.query_config(ConfigField::Quantum).await.unwrap(), 16);
    assert_eq!(session.query_config(ConfigField::Qset).await.unwrap(), 8);
    assert_eq!(session.device_size().await.unwrap(), 0);
}

#[tokio::test]
async fn test_configuration_is_per_device() {
    let registry = Registry::default();
    let first = registry.open("scull0", request()).await.unwrap();
    let second = registry.open("scull1", request()).await.unwrap();

    first.configure(ConfigField::Quantum, 100).await.unwrap();
    assert_eq!(first.query_config(ConfigField::Quantum).await.unwrap(), 100);
    assert_eq!(second.query_config(ConfigField::Quantum).await.unwrap(), 4000);

    // Visible to every session of the same device
    let again = registry.open("scull0", request()).await.unwrap();
    assert_eq!(again.query_config(ConfigField::Quantum).await.unwrap(), 100);
}

#[tokio::test]
async fn test_exchange_returns_previous_value() {
    let registry = Registry::default();
    let session = registry.open("scull0", request()).await.unwrap();

    assert_eq!(session.exchange_config(ConfigField::Qset, 10).await.unwrap(), 1000);
    assert_eq!(session.exchange_config(ConfigField::Qset, 20).await.unwrap(), 10);
    assert_eq!(session.query_config(ConfigField::Qset).await.unwrap(), 20);
}

#[tokio::test]
async fn test_config_field_names() {
    let registry = Registry::default();
    let session = registry.open("scull0", request()).await.unwrap();

    let field: ConfigField = "qset".parse().unwrap();
    session.configure(field, 3).await.unwrap();
    assert_eq!(session.query_config(ConfigField::Qset).await.unwrap(), 3);

    let err = "blocksize".parse::<ConfigField>().unwrap_err();
    assert!(matches!(err, ScullError::InvalidArgument(_)));
    assert_eq!(err.errno(), scull::error::EINVAL);
}

#[tokio::test]
async fn test_seek_variants() {
    let registry = Registry::default();
    let mut session = registry.open("scull0", request()).await.unwrap();
    session.write_all(b"0123456789").await.unwrap();

    assert_eq!(session.seek(SeekFrom::Start(3)).await.unwrap(), 3);
    assert_eq!(session.seek(SeekFrom::Current(2)).await.unwrap(), 5);
    assert_eq!(session.seek(SeekFrom::Current(-5)).await.unwrap(), 0);
    assert_eq!(session.seek(SeekFrom::End(-2)).await.unwrap(), 8);
    // Past the end is allowed
    assert_eq!(session.seek(SeekFrom::End(5)).await.unwrap(), 15);

    let mut buf = [0u8; 4];
    session.seek(SeekFrom::End(-2)).await.unwrap();
    assert_eq!(session.read(&mut buf).await.unwrap(), 2);
    assert_eq!(&buf[..2], b"89");
}

#[tokio::test]
async fn test_seek_before_start_is_invalid() {
    let registry = Registry::default();
    let mut session = registry.open("scull0", request()).await.unwrap();
    session.write_all(b"abc").await.unwrap();

    let err = session.seek(SeekFrom::Current(-10)).await.unwrap_err();
    assert!(matches!(err, ScullError::InvalidArgument(_)));
    assert!(matches!(
        session.seek(SeekFrom::End(-4)).await,
        Err(ScullError::InvalidArgument(_))
    ));
    // The cursor did not move
    assert_eq!(session.position(), 3);
}

#[tokio::test]
async fn test_cancelled_session_is_interrupted() {
    let registry = Registry::default();
    let mut session = registry.open("scull0", request()).await.unwrap();
    session.write_all(b"kept").await.unwrap();

    session.cancel_token().cancel();
    assert_eq!(session.write(b"lost").await, Err(ScullError::Interrupted));
    assert_eq!(session.device_size().await, Err(ScullError::Interrupted));
    assert_eq!(session.position(), 4);

    let other = registry.open("scull0", request()).await.unwrap();
    assert_eq!(other.device_size().await.unwrap(), 4);
}

#[tokio::test]
async fn test_teardown_empties_everything() {
    let registry = Registry::default();

    let mut plain = registry.open("scull0", request()).await.unwrap();
    plain.write_all(b"plain").await.unwrap();
    let mut private = registry
        .open(
            "scullpriv",
            OpenRequest::new(AccessMode::ReadWrite, Caller::new(1000).with_key("tty3")),
        )
        .await
        .unwrap();
    private.write_all(b"private").await.unwrap();
    assert!(registry.arena().in_use() > 0);

    registry.teardown().await;

    assert_eq!(plain.device_size().await.unwrap(), 0);
    assert_eq!(private.device_size().await.unwrap(), 0);
    drop(private);
    assert_eq!(registry.arena().in_use(), 0);
    assert_eq!(registry.arena().blocks(), 0);
}

#[tokio::test]
async fn test_session_as_embedded_io() {
    use embedded_io_async::{Read, Seek, Write};

    async fn round_trip<T: Read + Write + Seek>(io: &mut T) -> Vec<u8> {
        io.write_all(b"through the traits").await.ok();
        io.flush().await.ok();
        io.seek(embedded_io_async::SeekFrom::Start(8)).await.ok();
        let mut buf = [0u8; 32];
        let n = io.read(&mut buf).await.unwrap_or(0);
        buf[..n].to_vec()
    }

    let registry = Registry::default();
    let mut session = registry.open("scull2", request()).await.unwrap();
    assert_eq!(round_trip(&mut session).await, b"the traits");
}

#[test]
fn test_config_from_json() {
    let config = ScullConfig::from_reader(
        r#"{"quantum": 512, "qset": 64, "nr_devs": 1, "memory_limit": 1048576}"#.as_bytes(),
    )
    .unwrap();
    let registry = Registry::new(config);
    assert_eq!(registry.arena().limit(), Some(1_048_576));
    assert!(registry.controller("scull0").is_some());
    assert!(registry.controller("scull1").is_none());

    let err = ScullConfig::from_reader(r#"{"quantum": 0}"#.as_bytes()).unwrap_err();
    assert!(matches!(err, ScullError::InvalidArgument(_)));
}
