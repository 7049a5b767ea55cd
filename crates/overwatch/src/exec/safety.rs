//! Safety checks for remediation actions.

use crate::error::SafetyError;
use crate::remediation::{RemediationAction, RiskLevel};

use super::sanitize::CommandPolicy;
use super::SafetyChecker;

/// Safety checker backed by a [`CommandPolicy`].
#[derive(Debug, Clone)]
pub struct PolicySafetyChecker {
    policy: CommandPolicy,
    min_high_risk_confidence: f64,
}

impl PolicySafetyChecker {
    #[must_use]
    pub fn new(policy: CommandPolicy, min_high_risk_confidence: f64) -> Self {
        Self {
            policy,
            min_high_risk_confidence,
        }
    }
}

impl SafetyChecker for PolicySafetyChecker {
    fn is_safe(&self, action: &RemediationAction) -> Result<(), SafetyError> {
        if !(0.0..=1.0).contains(&action.confidence) {
            return Err(SafetyError::InvalidConfidence {
                value: action.confidence,
            });
        }
        if action.risk == RiskLevel::High && action.confidence < self.min_high_risk_confidence {
            return Err(SafetyError::HighRiskLowConfidence {
                required: self.min_high_risk_confidence,
                actual: action.confidence,
            });
        }
        if action.commands.is_empty() {
            return Err(SafetyError::NoCommands);
        }
        for command in &action.commands {
            self.validate_command(command)?;
        }
        Ok(())
    }

    fn validate_command(&self, command: &str) -> Result<(), SafetyError> {
        self.policy.validate(command).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_ALLOWED_VERBS;
    use crate::remediation::ActionType;

    fn checker() -> PolicySafetyChecker {
        PolicySafetyChecker::new(
            CommandPolicy::new("kubectl", DEFAULT_ALLOWED_VERBS.iter().copied(), "/tmp/overwatch"),
            0.8,
        )
    }

    fn action(action_type: ActionType, confidence: f64, commands: &[&str]) -> RemediationAction {
        RemediationAction {
            id: "a1".to_string(),
            risk: action_type.risk(),
            impact: action_type.impact().to_string(),
            action_type,
            description: "test".to_string(),
            commands: commands.iter().map(|c| (*c).to_string()).collect(),
            confidence,
            rollback: None,
            requires_approval: false,
        }
    }

    #[test]
    fn test_safe_restart() {
        let a = action(
            ActionType::Restart,
            0.6,
            &["kubectl rollout restart deployment/api -n prod"],
        );
        assert!(checker().is_safe(&a).is_ok());
    }

    #[test]
    fn test_high_risk_needs_confidence() {
        let a = action(ActionType::Configuration, 0.79, &["kubectl get configmap app"]);
        assert!(matches!(
            checker().is_safe(&a),
            Err(SafetyError::HighRiskLowConfidence { .. })
        ));

        let a = action(ActionType::Configuration, 0.8, &["kubectl get configmap app"]);
        assert!(checker().is_safe(&a).is_ok());
    }

    #[test]
    fn test_any_bad_command_fails_action() {
        let a = action(
            ActionType::Restart,
            0.9,
            &["kubectl get pods", "kubectl delete pod api-0"],
        );
        assert_eq!(
            checker().is_safe(&a),
            Err(SafetyError::NotAllowed {
                verb: "delete".to_string()
            })
        );
    }

    #[test]
    fn test_empty_and_invalid_confidence() {
        assert_eq!(
            checker().is_safe(&action(ActionType::Investigate, 0.5, &[])),
            Err(SafetyError::NoCommands)
        );
        assert!(matches!(
            checker().is_safe(&action(ActionType::Investigate, 1.5, &["kubectl get pods"])),
            Err(SafetyError::InvalidConfidence { .. })
        ));
    }

    #[test]
    fn test_validate_command_scale_to_zero() {
        assert_eq!(
            checker().validate_command("kubectl scale deployment/api --replicas=0"),
            Err(SafetyError::ScaleToZero)
        );
    }
}
