use serde::{Deserialize, Serialize};

/// One data record.
///
/// `values[v]` is the observed value of variable `v` (state index for
/// multinomial variables); `None` or NaN marks a missing value. Dynamic
/// records also carry the previous time step in `past`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataInstance {
    pub values: Vec<Option<f64>>,
    pub past: Option<Vec<Option<f64>>>,
    pub sequence_id: usize,
    pub time_id: usize,
}

impl DataInstance {
    pub fn new_static(sequence_id: usize, values: Vec<Option<f64>>) -> Self {
        DataInstance {
            values,
            past: None,
            sequence_id,
            time_id: 0,
        }
    }

    pub fn new_dynamic(
        sequence_id: usize,
        time_id: usize,
        past: Option<Vec<Option<f64>>>,
        present: Vec<Option<f64>>,
    ) -> Self {
        DataInstance {
            values: present,
            past,
            sequence_id,
            time_id,
        }
    }

    /// fully observed record from plain values
    pub fn observed(sequence_id: usize, values: &[f64]) -> Self {
        Self::new_static(sequence_id, values.iter().map(|&x| Some(x)).collect())
    }

    /// value of variable `var`, or of its temporal clone
    pub fn value(&self, var: usize, temporal: bool) -> Option<f64> {
        let row = if temporal {
            self.past.as_ref()?
        } else {
            &self.values
        };
        row.get(var).copied().flatten().filter(|x| !x.is_nan())
    }
}

/// A source of fixed-size batches over an ordered set of records.
pub trait BatchedData: Sync {
    fn instances(&self) -> &[DataInstance];

    fn num_instances(&self) -> usize {
        self.instances().len()
    }

    fn is_empty(&self) -> bool {
        self.num_instances() == 0
    }

    /// Consecutive batches of `batch_size` records; the last one may be
    /// smaller and an empty source yields no batch. `batch_size` must be
    /// positive.
    fn batches(&self, batch_size: usize) -> Vec<&[DataInstance]> {
        self.instances().chunks(batch_size).collect()
    }

    fn num_batches(&self, batch_size: usize) -> usize {
        self.num_instances().div_ceil(batch_size)
    }

    /// Split the batches into at most `num_partitions` contiguous
    /// groups. Every batch keeps its global batch index.
    fn partitions(
        &self,
        num_partitions: usize,
        batch_size: usize,
    ) -> Vec<Vec<(usize, &[DataInstance])>> {
        let batches: Vec<(usize, &[DataInstance])> =
            self.batches(batch_size).into_iter().enumerate().collect();
        if batches.is_empty() {
            return vec![];
        }
        let per_part = batches.len().div_ceil(num_partitions.max(1));
        batches.chunks(per_part).map(|c| c.to_vec()).collect()
    }
}

/// Records held in memory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataOnMemory {
    instances: Vec<DataInstance>,
}

impl DataOnMemory {
    pub fn new(instances: Vec<DataInstance>) -> Self {
        DataOnMemory { instances }
    }

    /// Dynamic records from sequences of rows; each record's `past` is
    /// the previous row of its sequence.
    pub fn from_sequences(sequences: &[Vec<Vec<Option<f64>>>]) -> Self {
        let mut instances = vec![];
        for (seq, rows) in sequences.iter().enumerate() {
            for (t, row) in rows.iter().enumerate() {
                let past = if t > 0 { Some(rows[t - 1].clone()) } else { None };
                instances.push(DataInstance::new_dynamic(seq, t, past, row.clone()));
            }
        }
        DataOnMemory { instances }
    }

    pub fn push(&mut self, instance: DataInstance) {
        self.instances.push(instance);
    }

    pub fn into_instances(self) -> Vec<DataInstance> {
        self.instances
    }
}

impl BatchedData for DataOnMemory {
    fn instances(&self) -> &[DataInstance] {
        &self.instances
    }
}

impl FromIterator<DataInstance> for DataOnMemory {
    fn from_iter<I: IntoIterator<Item = DataInstance>>(iter: I) -> Self {
        DataOnMemory::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy(n: usize) -> DataOnMemory {
        (0..n)
            .map(|i| DataInstance::observed(i, &[i as f64]))
            .collect()
    }

    #[test]
    fn batches_cover_stream_in_order() {
        let data = toy(10);
        let batches = data.batches(4);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[2].len(), 2);
        assert_eq!(data.num_batches(4), 3);
        assert_eq!(batches[1][0].sequence_id, 4);

        assert!(toy(0).batches(4).is_empty());
        assert_eq!(toy(3).batches(100).len(), 1);
    }

    #[test]
    fn partitions_keep_global_batch_index() {
        let data = toy(10);
        let parts = data.partitions(2, 3);
        assert_eq!(parts.len(), 2);
        let indices: Vec<usize> = parts.iter().flatten().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert!(toy(0).partitions(4, 3).is_empty());
    }

    #[test]
    fn sequences_link_previous_rows() {
        let data = DataOnMemory::from_sequences(&[vec![vec![Some(0.)], vec![Some(1.)]]]);
        let inst = data.instances();
        assert_eq!(inst[0].value(0, true), None);
        assert_eq!(inst[1].value(0, true), Some(0.));
        assert_eq!(inst[1].value(0, false), Some(1.));
        assert_eq!(inst[1].time_id, 1);
    }

    #[test]
    fn nan_counts_as_missing() {
        let inst = DataInstance::observed(0, &[f64::NAN, 1.0]);
        assert_eq!(inst.value(0, false), None);
        assert_eq!(inst.value(1, false), Some(1.0));
    }
}
