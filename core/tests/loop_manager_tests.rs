//! Loop manager behaviour over many frames.

use lumen_core::timing::{LoopCatchupMode, LoopConfig, LoopManager};
use rstest::rstest;

const STEP_60HZ: f64 = 1.0 / 60.0;
const FRAME_30HZ: f64 = 1.0 / 30.0;
const EPSILON: f64 = 1e-9;

fn fixed_loop(manager: &mut LoopManager, mode: LoopCatchupMode) -> lumen_core::LoopId {
    manager.register_loop(LoopConfig::fixed("physics", STEP_60HZ).with_catchup_mode(mode))
}

#[test]
fn fire_and_forget_discards_debt_every_tick() {
    let mut manager = LoopManager::new();
    let id = fixed_loop(&mut manager, LoopCatchupMode::FireAndForget);

    for frame in 1..=20u64 {
        manager.set_current_frame(frame);
        manager.update_loops(FRAME_30HZ);

        let reference = manager.loop_reference(id).unwrap();
        assert!(reference.should_execute_this_frame);
        assert!((reference.delta_time - FRAME_30HZ).abs() < EPSILON);
        assert_eq!(reference.step_count, frame);
        assert_eq!(reference.last_executed_frame, frame);
        assert_eq!(manager.accumulator(id).unwrap(), 0.0);
    }
}

#[test]
fn single_corrective_step_uses_exact_timestep_and_carries_debt() {
    let mut manager = LoopManager::new();
    let id = fixed_loop(&mut manager, LoopCatchupMode::SingleCorrectiveStep);

    for tick in 1..=20u64 {
        manager.update_loops(FRAME_30HZ);

        let reference = manager.loop_reference(id).unwrap();
        assert!(reference.should_execute_this_frame);
        assert_eq!(reference.delta_time, STEP_60HZ);
        assert_eq!(reference.step_count, tick);

        // One step runs per tick while two steps arrive, so one step of debt
        // is added each tick and never corrected.
        let expected_debt = tick as f64 * STEP_60HZ;
        assert!((manager.accumulator(id).unwrap() - expected_debt).abs() < 1e-6);
    }
}

#[test]
fn single_corrective_step_flags_debt_at_half_rate_input() {
    let mut manager = LoopManager::new();
    let id = fixed_loop(&mut manager, LoopCatchupMode::SingleCorrectiveStep);

    for _ in 0..20 {
        manager.update_loops(FRAME_30HZ);
    }

    let reference = manager.loop_reference(id).unwrap();
    assert!(reference.debt_exceeds_step);
    assert!(manager.accumulator(id).unwrap() > 19.0 * STEP_60HZ);
}

#[test]
fn single_corrective_step_matched_input_clears_flag() {
    let mut manager = LoopManager::new();
    let id = manager.register_loop(
        LoopConfig::fixed("physics", 0.0625)
            .with_catchup_mode(LoopCatchupMode::SingleCorrectiveStep),
    );

    manager.update_loops(0.125);
    manager.update_loops(0.125);
    assert!(manager.loop_reference(id).unwrap().debt_exceeds_step);

    // Idle ticks run one step each until the debt is below one step.
    for _ in 0..2 {
        manager.update_loops(0.001);
    }
    for _ in 0..20 {
        manager.update_loops(0.0625);
        let reference = manager.loop_reference(id).unwrap();
        assert!(reference.should_execute_this_frame);
        assert!(!reference.debt_exceeds_step);
    }
}

#[test]
fn single_corrective_step_tracks_debt_across_small_frames() {
    let mut manager = LoopManager::new();
    let id = fixed_loop(&mut manager, LoopCatchupMode::SingleCorrectiveStep);

    manager.update_loops(0.050);
    manager.update_loops(0.005);
    manager.update_loops(0.005);

    let reference = manager.loop_reference(id).unwrap();
    assert!(reference.should_execute_this_frame);
    assert_eq!(reference.step_count, 3);
}

#[rstest]
#[case(LoopCatchupMode::FireAndForget, 0.25)]
#[case(LoopCatchupMode::SingleCorrectiveStep, STEP_60HZ)]
#[case(LoopCatchupMode::MultipleSteps, STEP_60HZ)]
fn huge_frame_is_clamped_to_max_catchup(#[case] mode: LoopCatchupMode, #[case] delta: f64) {
    let mut manager = LoopManager::new();
    let id = manager.register_loop(
        LoopConfig::fixed("physics", STEP_60HZ)
            .with_catchup_mode(mode)
            .with_max_catchup_time(0.25),
    );

    manager.update_loops(10.0);

    let reference = manager.loop_reference(id).unwrap();
    assert!(reference.should_execute_this_frame);
    assert!((reference.delta_time - delta).abs() < EPSILON);

    // Whatever was not handed out is what remains of the clamped 0.25s.
    let remaining = manager.accumulator(id).unwrap();
    assert!((remaining + reference.delta_time - 0.25).abs() < EPSILON);
}

#[test]
fn variable_loop_is_clamped_to_max_catchup() {
    let mut manager = LoopManager::new();
    let id = manager.register_loop(LoopConfig::variable("render").with_max_catchup_time(0.25));

    manager.update_loops(10.0);
    assert!((manager.loop_reference(id).unwrap().delta_time - 0.25).abs() < EPSILON);
}

#[rstest]
#[case(LoopCatchupMode::FireAndForget)]
#[case(LoopCatchupMode::SingleCorrectiveStep)]
#[case(LoopCatchupMode::MultipleSteps)]
fn sub_step_frames_do_not_execute(#[case] mode: LoopCatchupMode) {
    let mut manager = LoopManager::new();
    let id = fixed_loop(&mut manager, mode);

    manager.update_loops(0.005);
    let reference = manager.loop_reference(id).unwrap();
    assert!(!reference.should_execute_this_frame);
    assert_eq!(reference.delta_time, 0.0);
    assert_eq!(reference.step_count, 0);
}

#[test]
fn multiple_steps_catches_up_within_one_tick() {
    let mut manager = LoopManager::new();
    let id = fixed_loop(&mut manager, LoopCatchupMode::MultipleSteps);

    manager.update_loops(0.1);
    let mut steps = 1;
    while manager.take_catchup_step(id) {
        steps += 1;
    }

    // 0.1s holds six whole 1/60s steps, give or take rounding on the last one.
    assert!((5..=6).contains(&steps));
    assert_eq!(manager.loop_reference(id).unwrap().step_count, steps);
    assert!(manager.accumulator(id).unwrap() < STEP_60HZ);
}

#[test]
fn independent_loops_do_not_interfere() {
    let mut manager = LoopManager::new();
    let render = manager.register_loop(LoopConfig::variable("render"));
    let physics = fixed_loop(&mut manager, LoopCatchupMode::SingleCorrectiveStep);
    let slow = manager.register_loop(LoopConfig::fixed("ai", 0.1));

    for _ in 0..4 {
        manager.update_loops(0.01);
    }

    assert_eq!(manager.loop_reference(render).unwrap().step_count, 4);
    assert_eq!(manager.loop_reference(physics).unwrap().step_count, 2);
    assert_eq!(manager.loop_reference(slow).unwrap().step_count, 0);
}
