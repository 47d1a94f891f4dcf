use crate::aggregate::{reduce, BatchOutput};
use crate::errors::Result;
use crate::svb::{BatchContext, Svb};
use bn_model::DataInstance;
use log::debug;
use natural_param::CompoundVector;
use serde::{Deserialize, Serialize};

/// Serialized updater state shipped once per run to every worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdaterSnapshot {
    bytes: Vec<u8>,
}

impl UpdaterSnapshot {
    pub fn of(svb: &Svb) -> Result<Self> {
        Ok(UpdaterSnapshot {
            bytes: serde_json::to_vec(svb)?,
        })
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        UpdaterSnapshot { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// a fresh updater, identical to the one the snapshot was taken of
    pub fn restore(&self) -> Result<Svb> {
        Ok(serde_json::from_slice(&self.bytes)?)
    }
}

#[derive(Serialize, Deserialize)]
struct RoundPrior {
    round: usize,
    posterior: CompoundVector,
}

/// The round's parameter posterior, serialized once per round and read
/// by every partition worker.
#[derive(Debug, Clone)]
pub struct Broadcast {
    round: usize,
    bytes: Vec<u8>,
}

impl Broadcast {
    pub fn new(round: usize, posterior: &CompoundVector) -> Result<Self> {
        let bytes = serde_json::to_vec(&RoundPrior {
            round,
            posterior: posterior.clone(),
        })?;
        Ok(Broadcast { round, bytes })
    }

    pub fn round(&self) -> usize {
        self.round
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn receive(&self) -> Result<CompoundVector> {
        let RoundPrior { posterior, .. } = serde_json::from_slice(&self.bytes)?;
        Ok(posterior)
    }
}

/// One partition worker: restore the updater and the round prior, run
/// every batch of the partition and fold the outputs locally.
pub fn run_partition(
    snapshot: &UpdaterSnapshot,
    broadcast: &Broadcast,
    batches: &[(usize, &[DataInstance])],
) -> Result<Option<BatchOutput>> {
    let worker = snapshot.restore()?;
    let posterior = broadcast.receive()?;
    let outputs = batches
        .iter()
        .map(|&(batch_index, batch)| {
            let ctx = BatchContext {
                round: broadcast.round(),
                batch_index,
            };
            worker.update_on_batch(batch, &posterior, ctx)
        })
        .collect::<Result<Vec<_>>>()?;
    debug!(
        "round {}: partition of {} batches done",
        broadcast.round(),
        outputs.len()
    );
    reduce(outputs)
}
