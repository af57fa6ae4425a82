use serde::{Deserialize, Serialize};

pub const WRITTEN_WORKS_WEIGHT: f64 = 0.20;
pub const PERFORMANCE_TASK_WEIGHT: f64 = 0.50;
pub const EXAM_WEIGHT: f64 = 0.30;

/// Final grades at or above this value are classified as low risk.
pub const LOW_RISK_THRESHOLD: f64 = 76.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskTier {
    #[serde(rename = "High Risk")]
    High,
    #[serde(rename = "Low Risk")]
    Low,
}

impl RiskTier {
    pub fn from_final_grade(final_grade: f64) -> Self {
        if final_grade >= LOW_RISK_THRESHOLD {
            RiskTier::Low
        } else {
            RiskTier::High
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RiskTier::High => "High Risk",
            RiskTier::Low => "Low Risk",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreInputs {
    pub activities: f64,
    pub quizzes: f64,
    pub performance_task: f64,
    pub exam: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Assessment {
    pub written_works: f64,
    pub final_grade: f64,
    pub risk: RiskTier,
}

/// Half-away-from-zero rounding to 2 decimals.
pub fn round_2_decimals(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

pub fn assess(inputs: &ScoreInputs) -> Assessment {
    let written_works = if inputs.activities != 0.0 || inputs.quizzes != 0.0 {
        (inputs.activities + inputs.quizzes) / 2.0
    } else {
        0.0
    };
    let final_grade = round_2_decimals(
        written_works * WRITTEN_WORKS_WEIGHT
            + inputs.performance_task * PERFORMANCE_TASK_WEIGHT
            + inputs.exam * EXAM_WEIGHT,
    );
    Assessment {
        written_works,
        final_grade,
        risk: RiskTier::from_final_grade(final_grade),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_eighty_is_low_risk() {
        let a = assess(&ScoreInputs {
            activities: 80.0,
            quizzes: 80.0,
            performance_task: 80.0,
            exam: 80.0,
        });
        assert_eq!(a.written_works, 80.0);
        assert_eq!(a.final_grade, 80.0);
        assert_eq!(a.risk, RiskTier::Low);
    }

    #[test]
    fn blank_written_works_counts_as_zero() {
        let a = assess(&ScoreInputs {
            activities: 0.0,
            quizzes: 0.0,
            performance_task: 100.0,
            exam: 100.0,
        });
        assert_eq!(a.written_works, 0.0);
        assert_eq!(a.final_grade, 80.0);
    }

    #[test]
    fn risk_serializes_as_its_label() {
        for tier in [RiskTier::High, RiskTier::Low] {
            assert_eq!(serde_json::to_value(tier).expect("json"), tier.label());
        }
    }
}
