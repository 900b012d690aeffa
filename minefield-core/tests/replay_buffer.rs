use anyhow::Result;
use minefield_core::{
    error::MinefieldError,
    replay_buffer::{PerConfig, PrioritizedReplayBuffer, ReplayBufferConfig},
    ExperienceBufferBase, Observation, ReplayBufferBase, Transition,
};
use std::fs;
use tempdir::TempDir;
use test_log::test;

fn transition(reward: f32) -> Transition {
    let obs = Observation::empty(2);
    Transition::new(obs.clone(), (reward as usize) % 4, reward, obs, false).unwrap()
}

fn buffer(capacity: usize, alpha: f32) -> PrioritizedReplayBuffer {
    let config = ReplayBufferConfig::default()
        .capacity(capacity)
        .seed(1)
        .per_config(PerConfig::default().alpha(alpha));
    PrioritizedReplayBuffer::build(&config)
}

fn rewards(buffer: &PrioritizedReplayBuffer) -> Vec<f32> {
    (0..buffer.len())
        .map(|ix| buffer.get(ix).unwrap().reward)
        .collect()
}

#[test]
fn test_fifth_push_overwrites_slot_zero() -> Result<()> {
    let mut buffer = buffer(4, 0.6);
    for r in 0..4 {
        buffer.push(transition(r as f32))?;
    }
    assert_eq!(buffer.priorities(), &[1.0, 1.0, 1.0, 1.0]);
    assert_eq!(buffer.cursor(), 0);

    buffer.push(transition(4.0))?;
    assert_eq!(buffer.len(), 4);
    assert_eq!(buffer.cursor(), 1);
    assert_eq!(rewards(&buffer), vec![4.0, 1.0, 2.0, 3.0]);
    Ok(())
}

#[test]
fn test_holds_most_recent_transitions() -> Result<()> {
    let capacity = 5;
    let mut buffer = buffer(capacity, 0.6);
    for r in 0..(capacity + 7) {
        buffer.push(transition(r as f32))?;
        assert!(buffer.len() <= capacity);
    }
    let mut stored = rewards(&buffer);
    stored.sort_by(|a, b| a.partial_cmp(b).unwrap());
    assert_eq!(stored, vec![7.0, 8.0, 9.0, 10.0, 11.0]);
    Ok(())
}

#[test]
fn test_max_weight_is_one() -> Result<()> {
    let mut buffer = buffer(16, 0.6);
    for r in 0..10 {
        buffer.push(transition(r as f32))?;
    }
    let ixs = (0..10).collect::<Vec<_>>();
    let ps = (0..10).map(|i| 0.1 + i as f32).collect::<Vec<_>>();
    buffer.update_priority(&ixs, &ps);

    for beta in [0.0f32, 0.4, 1.0].iter() {
        let batch = buffer.batch(8, *beta)?;
        let w_max = batch.weight.iter().fold(0f32, |m, &w| m.max(w));
        assert_eq!(w_max, 1.0);
        assert!(batch.weight.iter().all(|&w| w > 0.0 && w <= 1.0));
        assert_eq!(batch.len(), 8);
    }
    Ok(())
}

#[test]
fn test_probability_monotone_in_priority() -> Result<()> {
    let mut buffer = buffer(8, 0.6);
    for r in 0..4 {
        buffer.push(transition(r as f32))?;
    }
    buffer.update_priority(&[0, 1, 2, 3], &[0.5, 1.0, 2.0, 4.0]);
    let ps = (0..4).map(|ix| buffer.probability(ix)).collect::<Vec<_>>();
    assert!(ps.windows(2).all(|w| w[0] <= w[1]));
    assert!((ps.iter().sum::<f32>() - 1.0).abs() < 1e-5);

    // high-priority slots are drawn more often
    let batch = buffer.batch(2000, 0.4)?;
    let count = |ix: usize| batch.ix_sample.iter().filter(|&&i| i == ix).count();
    assert!(count(3) > count(0));
    Ok(())
}

#[test]
fn test_alpha_zero_is_uniform() -> Result<()> {
    let mut buffer = buffer(8, 0.0);
    for r in 0..4 {
        buffer.push(transition(r as f32))?;
    }
    buffer.update_priority(&[0, 1, 2, 3], &[0.01, 1.0, 5.0, 100.0]);
    for ix in 0..4 {
        assert!((buffer.probability(ix) - 0.25).abs() < 1e-6);
    }
    let batch = buffer.batch(4, 1.0)?;
    assert!(batch.weight.iter().all(|&w| (w - 1.0).abs() < 1e-6));
    Ok(())
}

fn assert_same(a: &PrioritizedReplayBuffer, b: &PrioritizedReplayBuffer) {
    assert_eq!(a.len(), b.len());
    assert_eq!(a.cursor(), b.cursor());
    assert_eq!(a.priorities(), b.priorities());
    for ix in 0..a.len() {
        assert_eq!(a.get(ix), b.get(ix));
    }
    for ix in 0..a.len() {
        assert!((a.probability(ix) - b.probability(ix)).abs() < 1e-6);
    }
}

#[test]
fn test_save_load_reproduces_buffer() -> Result<()> {
    let dir = TempDir::new("replay_buffer")?;

    // empty, partially filled and wrapped; alpha = 0 is uniform sampling
    for &alpha in [0.6f32, 0.0].iter() {
        for (case, n_pushes) in [0usize, 3, 7].iter().enumerate() {
            let mut original = buffer(4, alpha);
            for r in 0..*n_pushes {
                original.push(transition(r as f32))?;
            }
            if original.len() > 1 {
                original.update_priority(&[0, 1], &[0.3, 2.5]);
            }

            let path = dir.path().join(format!("replay_buffer_{}_{}.bin", alpha, case));
            original.save(&path)?;
            let mut restored = buffer(4, alpha);
            assert!(restored.load(&path)?);
            assert_same(&original, &restored);
        }
    }
    Ok(())
}

#[test]
fn test_restored_partial_buffer_samples_populated_slots_only() -> Result<()> {
    let dir = TempDir::new("replay_buffer")?;
    let path = dir.path().join("replay_buffer.bin");
    let mut original = buffer(8, 0.0);
    original.push(transition(0.0))?;
    original.push(transition(1.0))?;
    original.save(&path)?;

    let mut restored = buffer(8, 0.0);
    assert!(restored.load(&path)?);
    assert!((restored.probability(0) - 0.5).abs() < 1e-6);
    assert!((restored.probability(1) - 0.5).abs() < 1e-6);
    assert_eq!(restored.priorities()[2..], [0.0; 6]);

    let mut n_slot1 = 0;
    for _ in 0..500 {
        let batch = restored.batch(2, 0.4)?;
        n_slot1 += batch.ix_sample.iter().filter(|&&ix| ix == 1).count();
        assert_eq!(batch.weight, vec![1.0, 1.0]);
    }
    assert!(n_slot1 > 400 && n_slot1 < 600, "slot 1 drawn {} times of 1000", n_slot1);
    Ok(())
}

#[test]
fn test_load_missing_snapshot_is_noop() -> Result<()> {
    let dir = TempDir::new("replay_buffer")?;
    let mut buffer = buffer(4, 0.6);
    buffer.push(transition(1.0))?;
    assert!(!buffer.load(&dir.path().join("missing.bin"))?);
    assert_eq!(buffer.len(), 1);
    Ok(())
}

#[test]
fn test_load_corrupt_snapshot_fails() -> Result<()> {
    let dir = TempDir::new("replay_buffer")?;
    let path = dir.path().join("replay_buffer.bin");
    fs::write(&path, b"not a snapshot")?;
    let mut buffer = buffer(4, 0.6);
    let err = buffer.load(&path).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<MinefieldError>(),
        Some(MinefieldError::CheckpointLoad(_))
    ));
    Ok(())
}
