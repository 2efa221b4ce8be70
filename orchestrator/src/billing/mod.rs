pub mod calculator;

pub use calculator::{
    next_billing_date, prorated_plan_change_amount, setup_fee_refund, validate_plan_change,
    PlanChangeKind,
};
