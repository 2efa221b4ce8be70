//! State machines for subscriptions, containers and image builds
//!
//! Every lifecycle state is a tagged-variant enum with an explicit
//! transition table. All state mutations in the database layer go through
//! [`ensure_transition`], which rejects moves outside the table before any
//! write happens.

use crate::errors::InvariantError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionState {
    Pending,
    Provisioning,
    Active,
    Suspended,
    Cancelled,
    Terminated,
}

impl SubscriptionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionState::Pending => "PENDING",
            SubscriptionState::Provisioning => "PROVISIONING",
            SubscriptionState::Active => "ACTIVE",
            SubscriptionState::Suspended => "SUSPENDED",
            SubscriptionState::Cancelled => "CANCELLED",
            SubscriptionState::Terminated => "TERMINATED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SubscriptionState::Terminated)
    }

    pub fn can_transition_to(&self, next: SubscriptionState) -> bool {
        use SubscriptionState::*;
        matches!(
            (self, next),
            (Pending, Provisioning)
                | (Pending, Cancelled)
                | (Provisioning, Active)
                | (Provisioning, Cancelled)
                | (Provisioning, Terminated)
                | (Active, Suspended)
                | (Active, Cancelled)
                | (Active, Terminated)
                | (Suspended, Active)
                | (Suspended, Cancelled)
                | (Suspended, Terminated)
                | (Cancelled, Terminated)
        )
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(SubscriptionState::Pending),
            "PROVISIONING" => Ok(SubscriptionState::Provisioning),
            "ACTIVE" => Ok(SubscriptionState::Active),
            "SUSPENDED" => Ok(SubscriptionState::Suspended),
            "CANCELLED" => Ok(SubscriptionState::Cancelled),
            "TERMINATED" => Ok(SubscriptionState::Terminated),
            other => Err(format!("Unknown subscription state '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerState {
    Creating,
    Running,
    Stopped,
    Rebooting,
    Error,
    Terminated,
}

impl ContainerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerState::Creating => "CREATING",
            ContainerState::Running => "RUNNING",
            ContainerState::Stopped => "STOPPED",
            ContainerState::Rebooting => "REBOOTING",
            ContainerState::Error => "ERROR",
            ContainerState::Terminated => "TERMINATED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ContainerState::Terminated)
    }

    pub fn can_transition_to(&self, next: ContainerState) -> bool {
        use ContainerState::*;
        matches!(
            (self, next),
            (Creating, Running)
                | (Creating, Error)
                | (Creating, Terminated)
                | (Running, Stopped)
                | (Running, Rebooting)
                | (Running, Error)
                | (Running, Terminated)
                | (Stopped, Running)
                | (Stopped, Error)
                | (Stopped, Terminated)
                | (Rebooting, Running)
                | (Rebooting, Error)
                | (Rebooting, Terminated)
                | (Error, Running)
                | (Error, Terminated)
        )
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContainerState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATING" => Ok(ContainerState::Creating),
            "RUNNING" => Ok(ContainerState::Running),
            "STOPPED" => Ok(ContainerState::Stopped),
            "REBOOTING" => Ok(ContainerState::Rebooting),
            "ERROR" => Ok(ContainerState::Error),
            "TERMINATED" => Ok(ContainerState::Terminated),
            other => Err(format!("Unknown container state '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageState {
    Pending,
    Validating,
    Building,
    Scanning,
    Completed,
    Failed,
    Rejected,
}

impl ImageState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageState::Pending => "PENDING",
            ImageState::Validating => "VALIDATING",
            ImageState::Building => "BUILDING",
            ImageState::Scanning => "SCANNING",
            ImageState::Completed => "COMPLETED",
            ImageState::Failed => "FAILED",
            ImageState::Rejected => "REJECTED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ImageState::Failed | ImageState::Rejected)
    }

    pub fn can_transition_to(&self, next: ImageState) -> bool {
        use ImageState::*;
        matches!(
            (self, next),
            (Pending, Validating)
                | (Pending, Failed)
                | (Validating, Building)
                | (Validating, Failed)
                | (Building, Scanning)
                | (Building, Failed)
                | (Scanning, Completed)
                | (Scanning, Failed)
                | (Completed, Rejected)
        )
    }
}

impl fmt::Display for ImageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ImageState::Pending),
            "VALIDATING" => Ok(ImageState::Validating),
            "BUILDING" => Ok(ImageState::Building),
            "SCANNING" => Ok(ImageState::Scanning),
            "COMPLETED" => Ok(ImageState::Completed),
            "FAILED" => Ok(ImageState::Failed),
            "REJECTED" => Ok(ImageState::Rejected),
            other => Err(format!("Unknown image state '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BillingCycle {
    Monthly,
    Quarterly,
    Annually,
}

impl BillingCycle {
    pub fn months(&self) -> u32 {
        match self {
            BillingCycle::Monthly => 1,
            BillingCycle::Quarterly => 3,
            BillingCycle::Annually => 12,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BillingCycle::Monthly => "MONTHLY",
            BillingCycle::Quarterly => "QUARTERLY",
            BillingCycle::Annually => "ANNUALLY",
        }
    }
}

impl fmt::Display for BillingCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BillingCycle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MONTHLY" => Ok(BillingCycle::Monthly),
            "QUARTERLY" => Ok(BillingCycle::Quarterly),
            "ANNUALLY" => Ok(BillingCycle::Annually),
            other => Err(format!("Unknown billing cycle '{}'", other)),
        }
    }
}

/// Check a subscription transition against the table
pub fn ensure_subscription_transition(
    from: SubscriptionState,
    to: SubscriptionState,
) -> Result<(), InvariantError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(InvariantError::IllegalTransition {
            entity: "Subscription",
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

/// Check a container transition against the table
pub fn ensure_container_transition(
    from: ContainerState,
    to: ContainerState,
) -> Result<(), InvariantError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(InvariantError::IllegalTransition {
            entity: "Container",
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

/// Check an image transition against the table
pub fn ensure_image_transition(from: ImageState, to: ImageState) -> Result<(), InvariantError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(InvariantError::IllegalTransition {
            entity: "Image",
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_transitions() {
        use SubscriptionState::*;
        assert!(Pending.can_transition_to(Provisioning));
        assert!(Provisioning.can_transition_to(Active));
        assert!(Active.can_transition_to(Suspended));
        assert!(Suspended.can_transition_to(Active));
        // Terminal states go nowhere
        assert!(!Terminated.can_transition_to(Active));
        assert!(!Terminated.can_transition_to(Pending));
        // No skipping provisioning
        assert!(!Pending.can_transition_to(Active));
    }

    #[test]
    fn test_container_transitions() {
        use ContainerState::*;
        assert!(Creating.can_transition_to(Running));
        assert!(Running.can_transition_to(Rebooting));
        assert!(Rebooting.can_transition_to(Running));
        assert!(Error.can_transition_to(Terminated));
        assert!(Error.can_transition_to(Running));
        assert!(!Terminated.can_transition_to(Running));
        assert!(!Stopped.can_transition_to(Rebooting));
    }

    #[test]
    fn test_image_pipeline_order() {
        use ImageState::*;
        // An image cannot move past BUILDING without VALIDATING first
        assert!(!Pending.can_transition_to(Building));
        assert!(!Pending.can_transition_to(Scanning));
        assert!(Pending.can_transition_to(Validating));
        assert!(Validating.can_transition_to(Building));
        assert!(Building.can_transition_to(Scanning));
        assert!(Scanning.can_transition_to(Completed));
        // Only completed images may be rejected
        assert!(Completed.can_transition_to(Rejected));
        assert!(!Building.can_transition_to(Rejected));
        assert!(!Failed.can_transition_to(Validating));
    }

    #[test]
    fn test_state_string_round_trip() {
        for s in [
            SubscriptionState::Pending,
            SubscriptionState::Provisioning,
            SubscriptionState::Active,
            SubscriptionState::Suspended,
            SubscriptionState::Cancelled,
            SubscriptionState::Terminated,
        ] {
            assert_eq!(s.as_str().parse::<SubscriptionState>().unwrap(), s);
        }
        for s in [
            ContainerState::Creating,
            ContainerState::Running,
            ContainerState::Stopped,
            ContainerState::Rebooting,
            ContainerState::Error,
            ContainerState::Terminated,
        ] {
            assert_eq!(s.as_str().parse::<ContainerState>().unwrap(), s);
        }
    }
}
