use crate::crds::hazelcast::{ExposeExternallyType, Hazelcast, RestoreConfiguration};
use crate::crds::hot_backup::HotBackup;
use crate::error::ReconcileError;
use crate::restore::RestoreProvider;
use crate::scheduler::parse_schedule;

pub fn validate_spec(h: &Hazelcast) -> Result<(), ReconcileError> {
    validate_expose_externally(h)?;
    validate_license(h)?;
    if let Some(restore) = h.spec.restore() {
        validate_restore_configuration(restore)?;
    }
    Ok(())
}

fn validate_expose_externally(h: &Hazelcast) -> Result<(), ReconcileError> {
    let Some(ee) = &h.spec.expose_externally else {
        return Ok(());
    };
    if ee.type_ == ExposeExternallyType::Unisocket && ee.member_access.is_some() {
        return Err(ReconcileError::validation(
            "when exposeExternally.type is set to \"Unisocket\", exposeExternally.memberAccess must not be set",
        ));
    }
    Ok(())
}

fn validate_license(h: &Hazelcast) -> Result<(), ReconcileError> {
    if h.spec.is_enterprise() && h.spec.license_key_secret.is_empty() {
        return Err(ReconcileError::validation(
            "when Hazelcast Enterprise is deployed, licenseKeySecret must be set",
        ));
    }
    Ok(())
}

pub fn validate_restore_configuration(r: &RestoreConfiguration) -> Result<(), ReconcileError> {
    if r.secret.is_empty() || r.bucket_uri.is_empty() {
        return Err(ReconcileError::validation(
            "when restore configuration is given, secret and bucketURI must be set",
        ));
    }
    RestoreProvider::try_from(r).map(|_| ())
}

pub fn validate_hot_backup_spec(hb: &HotBackup, cluster: &Hazelcast) -> Result<(), ReconcileError> {
    if cluster.spec.persistence_external() && hb.spec.secret.is_empty() {
        return Err(ReconcileError::validation(
            "when using external backup, secret must be set",
        ));
    }
    if !cluster.spec.persistence_enabled() {
        return Err(ReconcileError::validation(format!(
            "Hazelcast {} has no persistence configured, hot backup is not possible",
            hb.spec.hazelcast_resource_name
        )));
    }
    if !hb.spec.schedule.is_empty() {
        parse_schedule(&hb.spec.schedule)?;
    }
    Ok(())
}
