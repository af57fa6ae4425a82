#[path = "../src/grading.rs"]
mod grading;

use grading::{assess, RiskTier, ScoreInputs};

fn uniform(score: f64) -> ScoreInputs {
    ScoreInputs {
        activities: score,
        quizzes: score,
        performance_task: score,
        exam: score,
    }
}

#[test]
fn boundary_sits_at_seventy_six() {
    let below = assess(&uniform(75.99));
    assert_eq!(below.final_grade, 75.99);
    assert_eq!(below.risk, RiskTier::High);

    let at = assess(&uniform(76.0));
    assert_eq!(at.final_grade, 76.0);
    assert_eq!(at.risk, RiskTier::Low);

    assert_eq!(RiskTier::from_final_grade(75.99), RiskTier::High);
    assert_eq!(RiskTier::from_final_grade(76.00), RiskTier::Low);
}

#[test]
fn weights_are_twenty_fifty_thirty() {
    let a = assess(&ScoreInputs {
        activities: 90.0,
        quizzes: 70.0,
        performance_task: 60.0,
        exam: 100.0,
    });
    assert_eq!(a.written_works, 80.0);
    // 0.2 * 80 + 0.5 * 60 + 0.3 * 100
    assert_eq!(a.final_grade, 76.0);
    assert_eq!(a.risk, RiskTier::Low);

    let exam_only = assess(&ScoreInputs {
        exam: 100.0,
        ..ScoreInputs::default()
    });
    assert_eq!(exam_only.written_works, 0.0);
    assert_eq!(exam_only.final_grade, 30.0);
    assert_eq!(exam_only.risk, RiskTier::High);
}

#[test]
fn final_grade_is_rounded_to_two_decimals() {
    let a = assess(&ScoreInputs {
        activities: 33.333,
        quizzes: 0.0,
        performance_task: 77.777,
        exam: 11.111,
    });
    assert_eq!(a.final_grade, grading::round_2_decimals(a.final_grade));
    assert_eq!(a.final_grade, 45.56);
}
