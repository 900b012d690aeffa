use anyhow::Result;
use candle_core::{Device as CandleDevice, Tensor};
use minefield_candle_agent::{
    dqn::{Dqn, DqnConfig, QNetwork, QNetworkConfig},
    mlp::{Mlp, MlpConfig},
    opt::OptimizerConfig,
    Device,
};
use minefield_core::{
    error::MinefieldError,
    replay_buffer::{PrioritizedReplayBuffer, ReplayBufferConfig},
    ActionMask, Agent, ExperienceBufferBase, Observation, Policy, ReplayBufferBase, Transition,
};
use tempdir::TempDir;
use test_log::test;

type Buffer = PrioritizedReplayBuffer;

const SIDE: usize = 2;
const BATCH_SIZE: usize = 4;

fn config() -> DqnConfig<MlpConfig> {
    DqnConfig::default()
        .model_config(
            QNetworkConfig::default()
                .q_config(MlpConfig::for_board(SIDE).units(vec![16]))
                .opt_config(OptimizerConfig::Adam { lr: 1e-2 }),
        )
        .batch_size(BATCH_SIZE)
        .n_distill_passes(3)
        .device(Device::Cpu)
}

fn agent() -> Result<Dqn<Mlp>> {
    Dqn::build(config())
}

fn obs(revealed: &[usize]) -> Observation {
    let mut board = vec![0f32; SIDE * SIDE];
    for &i in revealed {
        board[i] = 1.0;
    }
    let numbers = (0..SIDE * SIDE).map(|i| i as f32 * 0.5).collect::<Vec<_>>();
    Observation::from_planes(SIDE, &board, &[0.0; SIDE * SIDE], &numbers).unwrap()
}

fn buffer_with(n: usize) -> Result<Buffer> {
    let mut buffer = Buffer::build(&ReplayBufferConfig::default().capacity(16).seed(3));
    for i in 0..n {
        let act = i % (SIDE * SIDE);
        let tr = Transition::new(obs(&[]), act, i as f32, obs(&[act]), i % 3 == 0)?;
        buffer.push(tr)?;
    }
    Ok(buffer)
}

fn params(net: &QNetwork<Mlp>) -> Vec<(String, Vec<f32>)> {
    let data = net.varmap().data().lock().unwrap();
    let mut params = data
        .iter()
        .map(|(k, v)| {
            let t: &Tensor = v.as_tensor();
            (k.clone(), t.flatten_all().unwrap().to_vec1::<f32>().unwrap())
        })
        .collect::<Vec<_>>();
    params.sort_by(|a, b| a.0.cmp(&b.0));
    params
}

fn assert_close(a: &[(String, Vec<f32>)], b: &[(String, Vec<f32>)], tol: f32) {
    assert_eq!(a.len(), b.len());
    for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
        assert_eq!(ka, kb);
        for (x, y) in va.iter().zip(vb.iter()) {
            assert!((x - y).abs() <= tol, "{}: {} != {}", ka, x, y);
        }
    }
}

#[test]
fn test_networks_start_identical() -> Result<()> {
    let agent = agent()?;
    let p = params(agent.qnet());
    assert_eq!(p, params(agent.qnet_tgt()));
    assert_eq!(p, params(agent.qnet_distill()));
    Ok(())
}

#[test]
fn test_greedy_action_is_legal() -> Result<()> {
    let mut agent = agent()?;
    let masks = [
        vec![true, false, false, false],
        vec![false, true, false, true],
        vec![false, false, true, false],
        vec![true, true, true, true],
    ];
    for flags in masks.iter() {
        let mask = ActionMask::new(flags.clone());
        let act = agent.best_action(&obs(&[]), &mask)?;
        assert!(mask.is_legal(act));

        let q = agent.q_values(&obs(&[]))?;
        let best = mask
            .legal_actions()
            .into_iter()
            .map(|i| q[i])
            .fold(f32::NEG_INFINITY, f32::max);
        assert_eq!(q[act], best);
    }

    let err = agent
        .best_action(&obs(&[]), &ActionMask::new(vec![false; 4]))
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<MinefieldError>(),
        Some(MinefieldError::NoLegalAction)
    ));
    Ok(())
}

#[test]
fn test_opt_waits_for_a_full_batch() -> Result<()> {
    let mut agent = agent()?;
    let mut buffer = buffer_with(BATCH_SIZE - 1)?;
    assert!(Agent::<Buffer>::opt_with_record(&mut agent, &mut buffer, 0.4)?.is_none());
    assert!(Agent::<Buffer>::distill(&mut agent, &mut buffer)?.is_none());
    assert_eq!(agent.n_opts(), 0);
    Ok(())
}

#[test]
fn test_target_tracks_policy() -> Result<()> {
    let mut agent = agent()?;
    let mut buffer = buffer_with(8)?;
    let tgt_before = params(agent.qnet_tgt());

    let record = Agent::<Buffer>::opt_with_record(&mut agent, &mut buffer, 0.4)?.unwrap();
    assert!(record.get_scalar("loss_critic")? >= 0.0);
    assert_eq!(agent.n_opts(), 1);

    let policy_after = params(agent.qnet());
    let expected = policy_after
        .iter()
        .zip(tgt_before.iter())
        .map(|((k, p), (_, t))| {
            let v = p
                .iter()
                .zip(t.iter())
                .map(|(p, t)| 0.01 * p + 0.99 * t)
                .collect::<Vec<_>>();
            (k.clone(), v)
        })
        .collect::<Vec<_>>();
    assert_close(&params(agent.qnet_tgt()), &expected, 1e-5);
    assert_ne!(policy_after, tgt_before);
    Ok(())
}

#[test]
fn test_opt_updates_priorities() -> Result<()> {
    let mut agent = agent()?;
    let mut buffer = buffer_with(8)?;
    assert!(buffer.priorities()[..8].iter().all(|&p| p == 1.0));

    Agent::<Buffer>::opt_with_record(&mut agent, &mut buffer, 0.4)?;
    let priorities = &buffer.priorities()[..8];
    assert!(priorities.iter().any(|&p| p != 1.0));
    assert!(priorities.iter().all(|&p| p >= 1e-5));
    Ok(())
}

#[test]
fn test_pretrain_step_fits_expert_transition() -> Result<()> {
    let mut agent = agent()?;
    let tr = Transition::new(obs(&[]), 2, 5.0, obs(&[2]), true)?;
    let first = Agent::<Buffer>::pretrain_step(&mut agent, &tr)?.get_scalar("loss_pretrain")?;
    let mut last = first;
    for _ in 0..50 {
        last = Agent::<Buffer>::pretrain_step(&mut agent, &tr)?.get_scalar("loss_pretrain")?;
    }
    assert!(last < first, "{} >= {}", last, first);

    // pretraining leaves the target network alone
    assert_ne!(params(agent.qnet()), params(agent.qnet_tgt()));
    Ok(())
}

#[test]
fn test_distill_and_refresh() -> Result<()> {
    let mut agent = agent()?;
    let mut buffer = buffer_with(8)?;
    let reference = params(agent.qnet_distill());
    for _ in 0..3 {
        Agent::<Buffer>::opt_with_record(&mut agent, &mut buffer, 0.4)?;
    }
    let record = Agent::<Buffer>::distill(&mut agent, &mut buffer)?.unwrap();
    assert!(record.get_scalar("loss_distill")? > 0.0);
    assert_eq!(params(agent.qnet_distill()), reference);

    Agent::<Buffer>::refresh_distill_reference(&mut agent)?;
    assert_eq!(params(agent.qnet_distill()), params(agent.qnet()));
    Ok(())
}

#[test]
fn test_save_and_load_params() -> Result<()> {
    let dir = TempDir::new("dqn")?;
    let mut agent_a = agent()?;
    let mut buffer = buffer_with(8)?;
    for _ in 0..3 {
        Agent::<Buffer>::opt_with_record(&mut agent_a, &mut buffer, 0.4)?;
    }
    Agent::<Buffer>::save_params(&agent_a, dir.path())?;
    for name in [
        "qnet.safetensors",
        "qnet_tgt.safetensors",
        "qnet_distill.safetensors",
        "opt.safetensors",
    ]
    .iter()
    {
        assert!(dir.path().join(name).exists());
    }

    let mut agent_b = agent()?;
    Agent::<Buffer>::load_params(&mut agent_b, dir.path())?;
    assert_eq!(params(agent_a.qnet()), params(agent_b.qnet()));
    assert_eq!(params(agent_a.qnet_tgt()), params(agent_b.qnet_tgt()));
    assert_eq!(params(agent_a.qnet_distill()), params(agent_b.qnet_distill()));

    // identical updates after restoring the optimizer state
    let tr = Transition::new(obs(&[]), 1, 1.0, obs(&[1]), false)?;
    Agent::<Buffer>::pretrain_step(&mut agent_a, &tr)?;
    Agent::<Buffer>::pretrain_step(&mut agent_b, &tr)?;
    assert_eq!(params(agent_a.qnet()), params(agent_b.qnet()));
    Ok(())
}

#[test]
fn test_save_policy() -> Result<()> {
    let dir = TempDir::new("dqn")?;
    let agent = agent()?;
    let path = dir.path().join("model").join("policy_final.safetensors");
    Agent::<Buffer>::save_policy(&agent, &path)?;

    let tensors = candle_core::safetensors::load(&path, &CandleDevice::Cpu)?;
    assert_eq!(tensors.len(), params(agent.qnet()).len());
    Ok(())
}
