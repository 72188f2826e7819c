//! Publishing state outputs next to the record.
//!
//! Plain values go to the config map `<record>-outputs`, sensitive values to
//! the secret of the same name.

use tracing::debug;

use super::OUTPUTS_SUFFIX;
use crate::controller::{Pass, ReconcileResult};
use crate::remote::StateOutput;
use crate::resources::Spec;
use crate::secrets::{ObjectClass, SecretData};

/// Render an output value the way a consumer would read it back: strings
/// verbatim, everything else as JSON.
pub fn output_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Split outputs into plain and sensitive values.
pub fn split_outputs(outputs: &[StateOutput]) -> (SecretData, SecretData) {
    let mut plain = SecretData::new();
    let mut sensitive = SecretData::new();
    for output in outputs {
        let target = if output.sensitive {
            &mut sensitive
        } else {
            &mut plain
        };
        target.insert(output.name.clone(), output_value(&output.value));
    }
    (plain, sensitive)
}

fn outputs_name<S: Spec>(pass: &Pass<'_, S>) -> String {
    format!("{}{OUTPUTS_SUFFIX}", pass.key().name)
}

/// Write `outputs` and return the plain values.
pub async fn publish_outputs<S: Spec>(
    pass: &Pass<'_, S>,
    outputs: &[StateOutput],
) -> ReconcileResult<SecretData> {
    let (plain, sensitive) = split_outputs(outputs);
    let name = outputs_name(pass);
    let namespace = pass.namespace();

    pass.ctx
        .secrets
        .put(ObjectClass::Config, namespace, &name, plain.clone())
        .await?;
    pass.ctx
        .secrets
        .put(ObjectClass::Secret, namespace, &name, sensitive)
        .await?;
    debug!(name = %name, outputs = outputs.len(), "Published outputs");
    Ok(plain)
}

/// Remove both output objects.
pub async fn remove_outputs<S: Spec>(pass: &Pass<'_, S>) -> ReconcileResult<()> {
    let name = outputs_name(pass);
    let namespace = pass.namespace();
    pass.ctx
        .secrets
        .delete(ObjectClass::Config, namespace, &name)
        .await?;
    pass.ctx
        .secrets
        .delete(ObjectClass::Secret, namespace, &name)
        .await?;
    Ok(())
}
