use crate::{
    collection::{CollectionError, RecordCollection},
    error::{ErrorClass, ErrorOrigin, InternalError},
    value::RecordId,
};
use std::collections::HashSet;

impl RecordCollection {
    /// Receiver ids followed by the ids of `other` not already present.
    pub fn union(&self, other: &Self) -> Result<Self, InternalError> {
        self.ensure_same_model(other)?;
        let ids = self.ids.iter().chain(other.ids.iter()).copied().collect();

        Ok(self.derive(ids))
    }

    /// Receiver ids absent from `other`, in receiver order.
    pub fn subtract(&self, other: &Self) -> Result<Self, InternalError> {
        self.ensure_same_model(other)?;
        let removed: HashSet<RecordId> = other.ids.iter().copied().collect();

        Ok(self.derive(
            self.ids
                .iter()
                .filter(|id| !removed.contains(id))
                .copied()
                .collect(),
        ))
    }

    /// Receiver ids also present in `other`, in receiver order.
    pub fn intersect(&self, other: &Self) -> Result<Self, InternalError> {
        self.ensure_same_model(other)?;
        let kept: HashSet<RecordId> = other.ids.iter().copied().collect();

        Ok(self.derive(
            self.ids
                .iter()
                .filter(|id| kept.contains(id))
                .copied()
                .collect(),
        ))
    }

    /// Same model and same id set, ignoring order.
    #[must_use]
    pub fn equals(&self, other: &Self) -> bool {
        if self.model.name() != other.model.name() || self.ids.len() != other.ids.len() {
            return false;
        }
        let mine: HashSet<RecordId> = self.ids.iter().copied().collect();

        other.ids.iter().all(|id| mine.contains(id))
    }

    /// One collection per tuple of the cross product of the receiver and
    /// `others`, taking one id from every factor. The receiver varies
    /// slowest and the last factor fastest.
    pub fn cartesian_product(&self, others: &[Self]) -> Result<Vec<Self>, InternalError> {
        for other in others {
            self.ensure_same_model(other)?;
        }
        let factors: Vec<&[RecordId]> = std::iter::once(self.ids())
            .chain(others.iter().map(Self::ids))
            .collect();

        let total = factors
            .iter()
            .try_fold(1usize, |acc, factor| acc.checked_mul(factor.len()));
        let limit = self.env.config().max_cartesian_results;
        let total = match total {
            Some(total) if total <= limit => total,
            _ => {
                return Err(InternalError::new(
                    ErrorClass::InvalidArgument,
                    ErrorOrigin::Collection,
                    format!(
                        "cartesian product of {} factors on '{}' exceeds {limit} results",
                        factors.len(),
                        self.model.name()
                    ),
                ));
            }
        };
        if total == 0 {
            return Ok(Vec::new());
        }

        let mut results = Vec::with_capacity(total);
        let mut cursor = vec![0usize; factors.len()];
        loop {
            let tuple = cursor
                .iter()
                .zip(&factors)
                .map(|(index, factor)| factor[*index])
                .collect();
            results.push(self.derive(tuple));

            // advance the odometer, innermost factor first
            let mut position = factors.len();
            loop {
                if position == 0 {
                    return Ok(results);
                }
                position -= 1;
                cursor[position] += 1;
                if cursor[position] < factors[position].len() {
                    break;
                }
                cursor[position] = 0;
            }
        }
    }

    fn ensure_same_model(&self, other: &Self) -> Result<(), InternalError> {
        if self.model.name() == other.model.name() {
            Ok(())
        } else {
            Err(CollectionError::ModelMismatch {
                left: self.model.name().to_string(),
                right: other.model.name().to_string(),
            }
            .into())
        }
    }
}
