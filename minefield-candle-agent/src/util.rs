//! Utilities.
use anyhow::{anyhow, Result};
use candle_core::{Device, Tensor, Var};
use candle_nn::VarMap;
use log::trace;
use minefield_core::{Observation, N_PLANES};
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

fn lock(vars: &Mutex<HashMap<String, Var>>) -> Result<MutexGuard<HashMap<String, Var>>> {
    vars.lock().map_err(|_| anyhow!("VarMap lock poisoned"))
}

/// Apply soft update on variables.
///
/// Variables are identified by their names.
///
/// dest = tau * src + (1.0 - tau) * dest
pub fn track(dest: &VarMap, src: &VarMap, tau: f64) -> Result<()> {
    trace!("dest");
    let dest = lock(dest.data())?;
    trace!("src");
    let src = lock(src.data())?;

    for (k_dest, v_dest) in dest.iter() {
        let v_src = src
            .get(k_dest)
            .ok_or_else(|| anyhow!("Variable {} not found in source", k_dest))?;
        let t_src = v_src.as_tensor().affine(tau, 0.0)?;
        let t_dest = v_dest.as_tensor().affine(1.0 - tau, 0.0)?;
        v_dest.set(&(t_src + t_dest)?)?;
    }

    Ok(())
}

/// Copies the values of all variables of `src` into `dest`.
pub fn hard_copy(dest: &VarMap, src: &VarMap) -> Result<()> {
    let dest = lock(dest.data())?;
    let src = lock(src.data())?;

    for (k_dest, v_dest) in dest.iter() {
        let v_src = src
            .get(k_dest)
            .ok_or_else(|| anyhow!("Variable {} not found in source", k_dest))?;
        v_dest.set(v_src.as_tensor())?;
    }

    Ok(())
}

/// Interface for handling output dimensions.
pub trait OutDim {
    /// Returns the output dimension.
    fn get_out_dim(&self) -> usize;

    /// Sets the  output dimension.
    fn set_out_dim(&mut self, v: usize);
}

/// Stacks observations into a tensor of shape `[batch, 3, side, side]`.
pub fn obs_to_tensor(obs: &[Observation], device: &Device) -> Result<Tensor> {
    let side = match obs.first() {
        Some(o) => o.side(),
        None => return Err(anyhow!("Empty batch of observations")),
    };
    let mut data = Vec::with_capacity(obs.len() * N_PLANES * side * side);
    for o in obs.iter() {
        if o.side() != side {
            return Err(anyhow!(
                "Observations of different board sizes in a batch: {} and {}",
                side,
                o.side()
            ));
        }
        data.extend_from_slice(o.as_slice());
    }
    Ok(Tensor::from_vec(data, (obs.len(), N_PLANES, side, side), device)?)
}
