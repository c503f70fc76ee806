//! Parameter application
//!
//! Translates a component's parameter map into host parameter assignments.
//! Each entry is applied independently: a missing parameter or a rejected
//! expression is recorded for that entry and the next one is attempted.

use camorder_core::units;
use camorder_core::{
    DocumentHandle, HostError, HostSession, ParameterChange, ParameterFailure, ParameterMap,
    ParameterOutcome, UserParameter,
};

/// Applies order parameters to a host document
#[derive(Debug, Clone, Copy, Default)]
pub struct ParameterApplier;

impl ParameterApplier {
    pub fn new() -> Self {
        Self
    }

    /// Apply every entry of `parameters`, in order
    ///
    /// Returns one outcome per entry. Never fails as a whole; if the host
    /// cannot even list its parameters, every entry records that failure.
    pub fn apply<H: HostSession + ?Sized>(
        &self,
        host: &mut H,
        doc: &DocumentHandle,
        parameters: &ParameterMap,
    ) -> Vec<ParameterOutcome> {
        if parameters.is_empty() {
            tracing::warn!("No parameter updates requested for {}", doc.name);
            return Vec::new();
        }

        let existing = match host.list_user_parameters(doc) {
            Ok(existing) => existing,
            Err(e) => {
                tracing::error!("Cannot read user parameters of {}: {}", doc.name, e);
                return parameters
                    .iter()
                    .map(|(name, value)| ParameterOutcome {
                        name: name.to_string(),
                        requested: value.clone(),
                        result: Err(ParameterFailure::ParameterAssignmentFailed {
                            name: name.to_string(),
                            expression: value.to_string(),
                            message: e.to_string(),
                        }),
                    })
                    .collect();
            }
        };

        let outcomes: Vec<ParameterOutcome> = parameters
            .iter()
            .map(|(name, value)| ParameterOutcome {
                name: name.to_string(),
                requested: value.clone(),
                result: apply_one(&mut *host, doc, &existing, name, value),
            })
            .collect();

        let failed = outcomes.iter().filter(|o| !o.is_success()).count();
        if failed == 0 {
            tracing::info!(
                "Updated {} parameter(s) on {}",
                outcomes.len(),
                doc.name
            );
        } else {
            tracing::warn!(
                "Updated {}/{} parameter(s) on {} ({} failed)",
                outcomes.len() - failed,
                outcomes.len(),
                doc.name,
                failed
            );
        }

        outcomes
    }
}

/// Unit of an existing parameter, falling back to the unit in its expression
fn existing_unit(param: &UserParameter) -> &str {
    if !param.unit.trim().is_empty() {
        return param.unit.trim();
    }
    units::unit_of_expression(&param.expression).unwrap_or("")
}

fn apply_one<H: HostSession + ?Sized>(
    host: &mut H,
    doc: &DocumentHandle,
    existing: &[UserParameter],
    name: &str,
    value: &camorder_core::ParameterValue,
) -> Result<ParameterChange, ParameterFailure> {
    let Some(param) = existing.iter().find(|p| p.name == name) else {
        tracing::warn!("Parameter '{}' not found in {}", name, doc.name);
        return Err(ParameterFailure::ParameterNotFound {
            name: name.to_string(),
        });
    };

    let expression = value.to_expression(existing_unit(param));
    tracing::debug!(
        "Setting '{}' ({}) from '{}' to '{}'",
        name,
        value.kind(),
        param.expression,
        expression
    );

    match host.set_parameter(doc, name, &expression) {
        Ok(()) => {
            tracing::info!("  {}: {} -> {}", name, param.expression, expression);
            Ok(ParameterChange {
                old_expression: param.expression.clone(),
                new_expression: expression,
            })
        }
        Err(HostError::ParameterNotFound { .. }) => {
            tracing::warn!("Parameter '{}' disappeared from {}", name, doc.name);
            Err(ParameterFailure::ParameterNotFound {
                name: name.to_string(),
            })
        }
        Err(e) => {
            let message = match e {
                HostError::InvalidExpression { message, .. } => message,
                other => other.to_string(),
            };
            tracing::warn!(
                "Failed to set '{}' to '{}': {}",
                name,
                expression,
                message
            );
            Err(ParameterFailure::ParameterAssignmentFailed {
                name: name.to_string(),
                expression,
                message,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camorder_core::{DocumentFixture, HostFixture, ParameterValue, SimulatedHost};

    fn door_host() -> (SimulatedHost, DocumentHandle) {
        let fixture = HostFixture::new().with_document(
            DocumentFixture::new("door")
                .with_parameter("height", "2000 mm", "mm")
                .with_parameter("angle", "90 deg", "")
                .with_parameter("hasHandle", "0", ""),
        );
        let mut host = SimulatedHost::new(fixture);
        let doc = host.open("door.f3d").unwrap();
        (host, doc)
    }

    #[test]
    fn test_numeric_value_inherits_unit() {
        let (mut host, doc) = door_host();
        let mut params = ParameterMap::new();
        params.insert("height", ParameterValue::from_json(&2100.into()).unwrap());
        params.insert("angle", ParameterValue::from_json(&45.into()).unwrap());

        let outcomes = ParameterApplier::new().apply(&mut host, &doc, &params);
        assert_eq!(outcomes.len(), 2);
        assert_eq!(
            outcomes[0].result,
            Ok(ParameterChange {
                old_expression: "2000 mm".to_string(),
                new_expression: "2100 mm".to_string(),
            })
        );
        // Unit taken from the expression when the host reports none
        assert_eq!(host.parameter("door", "angle").unwrap().expression, "45 deg");
    }

    #[test]
    fn test_flag_is_stringified() {
        let (mut host, doc) = door_host();
        let mut params = ParameterMap::new();
        params.insert("hasHandle", ParameterValue::IntegerFlag(1));

        let outcomes = ParameterApplier::new().apply(&mut host, &doc, &params);
        assert!(outcomes[0].is_success());
        assert_eq!(host.parameter("door", "hasHandle").unwrap().expression, "1");
    }

    #[test]
    fn test_rejected_expression_is_recorded() {
        let (mut host, doc) = door_host();
        let mut params = ParameterMap::new();
        params.insert(
            "height",
            ParameterValue::StringWithUnits("height * 2".to_string()),
        );

        let outcomes = ParameterApplier::new().apply(&mut host, &doc, &params);
        assert!(matches!(
            &outcomes[0].result,
            Err(ParameterFailure::ParameterAssignmentFailed { message, .. }) if message.contains("circular")
        ));
        assert_eq!(host.parameter("door", "height").unwrap().expression, "2000 mm");
    }

    #[test]
    fn test_lookup_is_case_sensitive() {
        let (mut host, doc) = door_host();
        let mut params = ParameterMap::new();
        params.insert("Height", ParameterValue::StringWithUnits("1 mm".to_string()));

        let outcomes = ParameterApplier::new().apply(&mut host, &doc, &params);
        assert_eq!(
            outcomes[0].result,
            Err(ParameterFailure::ParameterNotFound {
                name: "Height".to_string()
            })
        );
        assert!(host.assignments().is_empty());
    }

    #[test]
    fn test_empty_map_yields_no_outcomes() {
        let (mut host, doc) = door_host();
        let outcomes = ParameterApplier::new().apply(&mut host, &doc, &ParameterMap::new());
        assert!(outcomes.is_empty());
    }
}
