use autoexp_core::outcomes::{AimSide, BallOutcome, Outcome, OutcomeError};
use autoexp_core::sandbox::{PaddleState, Vec2};
use autoexp_core::state::{Action, StateAction};
use autoexp_core::{
    EmpiricalOracle, Exclusions, GeneratorConfig, InterventionGenerator, InterventionHistory,
    MarginalOracle, Value, VariableGraph, enumerate,
};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

fn noop() -> Action {
    Action::Code(Action::NOOP)
}

fn ball_at(x: f64, y: f64) -> PaddleState {
    PaddleState::default().with_ball(Vec2::new(x, y), Vec2::new(1.0, 3.0))
}

fn pairs(states: impl IntoIterator<Item = PaddleState>) -> Vec<StateAction<PaddleState>> {
    states.into_iter().map(|state| (state, noop())).collect()
}

fn decided(outcome: &BallOutcome, window: &[StateAction<PaddleState>]) -> bool {
    outcome.evaluate(window).expect("decidable")
}

#[test]
fn missed_ball_needs_the_ball_to_vanish() {
    let gone = PaddleState::default().without_balls();
    let vanished = pairs([ball_at(80.0, 200.0), gone]);
    assert!(decided(&BallOutcome::MissedBall, &vanished));

    let still_there = pairs([ball_at(80.0, 120.0), ball_at(81.0, 123.0)]);
    assert!(!decided(&BallOutcome::MissedBall, &still_there));
}

#[test]
fn missed_ball_accepts_a_ball_already_past_the_paddle() {
    let past = pairs([ball_at(80.0, 195.0), ball_at(81.0, 198.0)]);
    assert!(decided(&BallOutcome::MissedBall, &past));
}

#[test]
fn hit_ball_on_a_flat_trajectory_is_ambiguous() {
    let flat = pairs((0..4).map(|i| ball_at(40.0 + f64::from(i), 90.0)));
    let err = BallOutcome::HitBall
        .evaluate(&flat)
        .expect_err("stagnant ball");
    match err {
        OutcomeError::StagnantBall { frames, .. } => assert_eq!(frames.len(), 4),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn rounding_noise_does_not_hide_a_stagnant_ball() {
    let ys = [90.0, 90.0 + 1e-12, 90.0 - 1e-12, 90.0];
    let flat = pairs(ys.into_iter().map(|y| ball_at(40.0, y)));
    assert!(matches!(
        BallOutcome::HitBall.evaluate(&flat),
        Err(OutcomeError::StagnantBall { .. })
    ));
}

#[test]
fn short_windows_are_rejected_not_padded() {
    let window = pairs([ball_at(80.0, 100.0), ball_at(81.0, 103.0)]);
    let err = BallOutcome::HitBall
        .evaluate(&window)
        .expect_err("too short");
    assert!(matches!(
        err,
        OutcomeError::InadequateWindow {
            got: 2,
            expecting: 3,
            ..
        }
    ));
}

#[test]
fn aim_left_tracks_the_paddle_edge() {
    let paddle_x = 80.0;
    let aim_left = BallOutcome::Aim(AimSide::Left);
    // Width 24: left reference at 68, tolerance 6.
    let on_edge = pairs(
        [66.0, 68.0, 73.5]
            .into_iter()
            .map(|x| ball_at(x, 150.0).with_paddle_x(paddle_x)),
    );
    assert!(decided(&aim_left, &on_edge));

    let mut drifted = on_edge.clone();
    drifted.push((ball_at(75.0, 160.0).with_paddle_x(paddle_x), noop()));
    assert!(!decided(&aim_left, &drifted));
}

#[test]
fn enumeration_is_stable_and_honors_exclusions() {
    let state = ball_at(30.0, 60.0);
    let exclusions = Exclusions::new(["paddle", r"balls\[\d+\]\.velocity"]);
    let graph = VariableGraph::new();
    let first = enumerate(&state, &exclusions, &graph).expect("mutable fields");
    let second = enumerate(&state, &exclusions, &graph).expect("mutable fields");
    assert_eq!(first, second);
    assert!(first.iter().all(|name| !exclusions.excludes(name)));
    assert!(first.contains("balls[0].position.x"));
    assert!(first.contains("lives"));
    assert!(!first.contains("paddle_width"));
}

#[test]
fn discrete_variables_never_repeat_a_tried_value() {
    let states: Vec<PaddleState> = (1..=5)
        .map(|lives| PaddleState {
            lives,
            ..PaddleState::default()
        })
        .collect();
    let graph = VariableGraph::new();
    let oracle = EmpiricalOracle::from_states(&states, &graph).expect("oracle learns");
    let mut rng = ChaCha20Rng::seed_from_u64(3);
    let drawn = oracle.sample_marginal("lives", &mut rng);
    assert!(matches!(drawn, Ok(Value::Int(1..=5))));

    let state = PaddleState::default();
    let exclusions = Exclusions::new(["balls", "paddle", "score"]);
    let points = enumerate(&state, &exclusions, &graph).expect("mutable fields");
    let mut generator = InterventionGenerator::new(GeneratorConfig::default(), 9);
    let mut history = InterventionHistory::default();
    let mut seen = Vec::new();
    for _ in 0..10 {
        let next = generator.generate(&state, &mut history, &points, &graph, &oracle);
        let Ok(intervention) = next else {
            break;
        };
        assert!(!seen.contains(&intervention.value));
        assert_ne!(intervention.value, intervention.before);
        seen.push(intervention.value);
    }
    assert!(!seen.is_empty() && seen.len() <= 4);
}
