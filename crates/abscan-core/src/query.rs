//! Query preparation
//!
//! Raw residue strings are numbered by an external tool behind
//! [`NumberingService`], then laid out on the canonical vector.

use rayon::prelude::*;

use crate::encoding::{
    EncodedSequence, Encoder, EncodingError, EncodingMode, NumberingInput, Partition,
};
use crate::numbering::{ChainClass, PositionLabel};

/// Output of a successful numbering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberedSequence {
    pub chain: ChainClass,
    pub positions: Vec<(PositionLabel, char)>,
}

/// Seam to the numbering tool.
///
/// `None` means the tool could not number the sequence.
pub trait NumberingService: Send + Sync {
    fn number(&self, sequence: &str) -> Option<NumberedSequence>;
}

impl<F> NumberingService for F
where
    F: Fn(&str) -> Option<NumberedSequence> + Send + Sync,
{
    fn number(&self, sequence: &str) -> Option<NumberedSequence> {
        self(sequence)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreparedQuery {
    pub sequence: EncodedSequence,
    pub partition: Partition,
    /// `None` when numbering failed
    pub chain: Option<ChainClass>,
}

fn prepare_one(
    service: &dyn NumberingService,
    encoder: &Encoder,
    raw: &str,
) -> Result<PreparedQuery, EncodingError> {
    let Some(numbered) = service.number(raw) else {
        let record = encoder.resolve(Err(EncodingError::NumberingFailed(raw.to_string())))?;
        return Ok(PreparedQuery {
            sequence: record.sequence,
            partition: record.partition,
            chain: None,
        });
    };

    let record = encoder.encode(NumberingInput::Pairs(&numbered.positions))?;
    Ok(PreparedQuery {
        sequence: record.sequence,
        partition: record.partition,
        chain: Some(numbered.chain),
    })
}

/// Number and encode a batch in parallel, preserving input order.
///
/// Strict mode fails with the error of the earliest failing sequence.
pub fn prepare_queries<S: AsRef<str> + Sync>(
    service: &dyn NumberingService,
    sequences: &[S],
    mode: EncodingMode,
) -> Result<Vec<PreparedQuery>, EncodingError> {
    let encoder = Encoder::new(mode);
    let prepared: Vec<Result<PreparedQuery, EncodingError>> = sequences
        .par_iter()
        .map(|raw| prepare_one(service, &encoder, raw.as_ref()))
        .collect();
    prepared.into_iter().collect()
}

/// Encoded vectors of a prepared batch, ready for [`crate::SearchEngine::search`].
pub fn query_vectors(prepared: &[PreparedQuery]) -> Vec<EncodedSequence> {
    prepared.iter().map(|q| q.sequence).collect()
}
