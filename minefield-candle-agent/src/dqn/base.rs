//! DQN agent implemented with candle.
use super::{config::DqnConfig, model::QNetwork};
use crate::{
    model::SubModel1,
    opt::Optimizer,
    util::{obs_to_tensor, OutDim},
};
use anyhow::{anyhow, Result};
use candle_core::{shape::D, Device, Tensor};
use candle_nn::loss::mse;
use log::debug;
use minefield_core::{
    error::MinefieldError,
    record::Record,
    replay_buffer::TransitionBatch,
    ActionMask, Agent, Observation, Policy, ReplayBufferBase, Transition,
};
use serde::{de::DeserializeOwned, Serialize};
use std::{fs, path::Path};

const QNET_FILE: &str = "qnet.safetensors";
const QNET_TGT_FILE: &str = "qnet_tgt.safetensors";
const QNET_DISTILL_FILE: &str = "qnet_distill.safetensors";
const OPT_FILE: &str = "opt.safetensors";

/// Returns the legal action with the largest value.
///
/// Ties are broken toward the smaller index.
fn masked_argmax(values: &[f32], mask: &ActionMask) -> Result<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (ix, &v) in values.iter().enumerate() {
        if !mask.is_legal(ix) {
            continue;
        }
        match best {
            Some((_, b)) if !(v > b) => {}
            _ => best = Some((ix, v)),
        }
    }
    best.map(|(ix, _)| ix)
        .ok_or_else(|| MinefieldError::NoLegalAction.into())
}

#[allow(clippy::upper_case_acronyms)]
/// DQN agent with prioritized replay and a distillation reference.
pub struct Dqn<Q>
where
    Q: SubModel1<Input = Tensor, Output = Tensor>,
    Q::Config: DeserializeOwned + Serialize + OutDim + Clone,
{
    pub(in crate::dqn) qnet: QNetwork<Q>,
    pub(in crate::dqn) qnet_tgt: QNetwork<Q>,
    pub(in crate::dqn) qnet_distill: QNetwork<Q>,
    pub(in crate::dqn) opt: Optimizer,
    pub(in crate::dqn) batch_size: usize,
    pub(in crate::dqn) discount_factor: f64,
    pub(in crate::dqn) tau: f64,
    pub(in crate::dqn) n_distill_passes: usize,
    pub(in crate::dqn) distill_beta: f32,
    pub(in crate::dqn) priority_eps: f64,
    pub(in crate::dqn) train: bool,
    pub(in crate::dqn) device: Device,
    pub(in crate::dqn) n_opts: usize,
}

impl<Q> Dqn<Q>
where
    Q: SubModel1<Input = Tensor, Output = Tensor>,
    Q::Config: DeserializeOwned + Serialize + OutDim + Clone,
{
    /// Constructs DQN agent.
    ///
    /// The target and distillation reference networks start as copies of the
    /// policy network.
    pub fn build(config: DqnConfig<Q::Config>) -> Result<Self> {
        let device = config
            .device
            .ok_or_else(|| anyhow!("No device is given for DQN agent"))?
            .build()?;
        let qnet = QNetwork::from_config(&config.model_config, device.clone())?;
        let qnet_tgt = qnet.duplicate()?;
        let qnet_distill = qnet.duplicate()?;
        let opt = qnet.build_optimizer(config.model_config.get_opt_config())?;

        Ok(Dqn {
            qnet,
            qnet_tgt,
            qnet_distill,
            opt,
            batch_size: config.batch_size,
            discount_factor: config.discount_factor,
            tau: config.tau,
            n_distill_passes: config.n_distill_passes,
            distill_beta: config.distill_beta,
            priority_eps: config.priority_eps as f64,
            train: false,
            device,
            n_opts: 0,
        })
    }

    /// The policy network.
    pub fn qnet(&self) -> &QNetwork<Q> {
        &self.qnet
    }

    /// The target network.
    pub fn qnet_tgt(&self) -> &QNetwork<Q> {
        &self.qnet_tgt
    }

    /// The distillation reference network.
    pub fn qnet_distill(&self) -> &QNetwork<Q> {
        &self.qnet_distill
    }

    /// Number of TD optimization steps so far.
    pub fn n_opts(&self) -> usize {
        self.n_opts
    }

    /// Action-values of the policy network for a single observation.
    pub fn q_values(&self, obs: &Observation) -> Result<Vec<f32>> {
        let xs = obs_to_tensor(std::slice::from_ref(obs), &self.device)?;
        Ok(self.qnet.forward(&xs)?.squeeze(0)?.to_vec1::<f32>()?)
    }

    fn bool_to_not_done(is_terminated: &[bool], device: &Device) -> Result<Tensor> {
        let v = is_terminated
            .iter()
            .map(|&d| if d { 0f32 } else { 1f32 })
            .collect::<Vec<_>>();
        Ok(Tensor::from_vec(v, is_terminated.len(), device)?)
    }

    fn update_critic(&mut self, batch: TransitionBatch) -> Result<(f32, Vec<usize>, Vec<f32>)> {
        let n = batch.len();
        let (obs, act, next_obs, reward, is_terminated, weight, ix_sample) = batch.unpack();
        let obs = obs_to_tensor(&obs, &self.device)?;
        let next_obs = obs_to_tensor(&next_obs, &self.device)?;
        let act = {
            let act = act.iter().map(|&a| a as u32).collect::<Vec<_>>();
            Tensor::from_vec(act, (n, 1), &self.device)?
        };
        let reward = Tensor::from_vec(reward, n, &self.device)?;
        let is_not_done = Self::bool_to_not_done(&is_terminated, &self.device)?;
        let weight = Tensor::from_vec(weight, n, &self.device)?;

        let pred = self
            .qnet
            .forward(&obs)?
            .gather(&act, D::Minus1)?
            .squeeze(D::Minus1)?;

        let tgt = {
            let q = self.qnet_tgt.forward(&next_obs)?.max(D::Minus1)?;
            (reward + (is_not_done * q)?.affine(self.discount_factor, 0.0)?)?.detach()
        };

        let td_err = (&pred - &tgt)?;
        let loss = (&weight * td_err.sqr()?)?.mean_all()?;
        self.opt.backward_step(&loss)?;

        let priorities = td_err
            .detach()
            .abs()?
            .affine(1.0, self.priority_eps)?
            .to_vec1::<f32>()?;

        Ok((loss.to_scalar::<f32>()?, ix_sample, priorities))
    }
}

impl<Q> Policy for Dqn<Q>
where
    Q: SubModel1<Input = Tensor, Output = Tensor>,
    Q::Config: DeserializeOwned + Serialize + OutDim + Clone,
{
    /// Greedy action of the policy network restricted to legal cells.
    fn best_action(&mut self, obs: &Observation, mask: &ActionMask) -> Result<usize> {
        let q = self.q_values(obs)?;
        masked_argmax(&q, mask)
    }
}

impl<Q, R> Agent<R> for Dqn<Q>
where
    Q: SubModel1<Input = Tensor, Output = Tensor>,
    Q::Config: DeserializeOwned + Serialize + OutDim + Clone,
    R: ReplayBufferBase<Batch = TransitionBatch>,
{
    fn train(&mut self) {
        self.train = true;
    }

    fn eval(&mut self) {
        self.train = false;
    }

    fn is_train(&self) -> bool {
        self.train
    }

    fn pretrain_step(&mut self, tr: &Transition) -> Result<Record> {
        let obs = obs_to_tensor(std::slice::from_ref(&tr.obs), &self.device)?;
        let next_obs = obs_to_tensor(std::slice::from_ref(&tr.next_obs), &self.device)?;

        // Bootstraps from the policy network itself.
        let tgt = {
            let q_next = self.qnet.forward(&next_obs)?.max(D::Minus1)?.detach();
            let not_done = if tr.is_terminated { 0.0 } else { 1.0 };
            q_next.affine(self.discount_factor * not_done, tr.reward as f64)?
        };
        let pred = self.qnet.forward(&obs)?.narrow(1, tr.act, 1)?.squeeze(1)?;
        let loss = mse(&pred, &tgt)?;
        self.opt.backward_step(&loss)?;

        Ok(Record::from_scalar("loss_pretrain", loss.to_scalar::<f32>()?))
    }

    fn opt_with_record(&mut self, buffer: &mut R, beta: f32) -> Result<Option<Record>> {
        if buffer.len() < self.batch_size {
            return Ok(None);
        }

        let batch = buffer.batch(self.batch_size, beta)?;
        let (loss, ixs, priorities) = self.update_critic(batch)?;
        buffer.update_priority(&ixs, &priorities);
        self.qnet_tgt.soft_update_from(&self.qnet, self.tau)?;
        self.n_opts += 1;

        Ok(Some(Record::from_scalar("loss_critic", loss)))
    }

    fn distill(&mut self, buffer: &mut R) -> Result<Option<Record>> {
        let mut loss_distill = 0f32;
        let mut n_passes = 0;

        for _ in 0..self.n_distill_passes {
            if buffer.len() < self.batch_size {
                continue;
            }
            let batch = buffer.batch(self.batch_size, self.distill_beta)?;
            let obs = obs_to_tensor(&batch.obs, &self.device)?;
            let tgt = self.qnet_distill.forward(&obs)?.detach();
            let pred = self.qnet.forward(&obs)?;
            let loss = mse(&pred, &tgt)?;
            self.opt.backward_step(&loss)?;
            loss_distill += loss.to_scalar::<f32>()?;
            n_passes += 1;
        }

        if n_passes == 0 {
            return Ok(None);
        }
        debug!("Distilled the policy in {} passes", n_passes);

        Ok(Some(Record::from_scalar(
            "loss_distill",
            loss_distill / n_passes as f32,
        )))
    }

    fn refresh_distill_reference(&mut self) -> Result<()> {
        self.qnet_distill.hard_copy_from(&self.qnet)
    }

    fn save_params(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)?;
        self.qnet.save(path.join(QNET_FILE))?;
        self.qnet_tgt.save(path.join(QNET_TGT_FILE))?;
        self.qnet_distill.save(path.join(QNET_DISTILL_FILE))?;
        self.opt.save(path.join(OPT_FILE))?;
        Ok(())
    }

    fn load_params(&mut self, path: &Path) -> Result<()> {
        self.qnet.load(path.join(QNET_FILE))?;
        self.qnet_tgt.load(path.join(QNET_TGT_FILE))?;
        self.qnet_distill.load(path.join(QNET_DISTILL_FILE))?;
        self.opt.load(path.join(OPT_FILE))?;
        Ok(())
    }

    fn save_policy(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        self.qnet.save(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masked_argmax() -> Result<()> {
        let mask = ActionMask::new(vec![true, false, true, true]);
        assert_eq!(masked_argmax(&[0.0, 9.0, 2.0, 1.0], &mask)?, 2);
        assert_eq!(masked_argmax(&[0.0, 9.0, 2.0, 2.0], &mask)?, 2);
        assert_eq!(masked_argmax(&[-1.0, 9.0, -3.0, -2.0], &mask)?, 0);

        let mask = ActionMask::new(vec![false; 4]);
        let err = masked_argmax(&[0.0; 4], &mask).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MinefieldError>(),
            Some(MinefieldError::NoLegalAction)
        ));
        Ok(())
    }
}
