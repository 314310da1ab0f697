//! Channel remapping
//!
//! Builds a downmix/upmix weight matrix between two channel layouts and
//! applies it per audio frame. Channels present in both layouts pass through
//! at unity gain; unmatched input channels are routed through a fixed
//! fallback cascade that spreads their energy across substitute speakers.

use thiserror::Error;

use crate::types::{Channel, ChannelLayout, Sample};

/// Errors from matrix construction
#[derive(Debug, Error)]
pub enum RemapError {
    #[error("empty channel layout")]
    EmptyLayout,

    /// The output layout has no speakers that can carry this input channel.
    /// A reportable condition, not a silent fallback.
    #[error("insufficient output channels to render {0}")]
    InsufficientChannels(&'static str),
}

/// One contribution of a source channel to an output channel
#[derive(Debug, Clone, Copy)]
struct Contribution {
    source: usize,
    weight: f32,
    /// How many merges have landed on this entry, for the combine rule
    fan_in: u32,
}

/// Per-output-channel weight matrix between two layouts.
///
/// Each output channel holds an ordered list of (source-channel-index, gain)
/// pairs. With normalization enabled the maximum per-output gain sum across
/// the matrix is scaled to at most 1.0.
#[derive(Debug, Clone)]
pub struct DownmixMatrix {
    rows: Vec<Vec<Contribution>>,
    input_channels: usize,
}

/// Fallback alternatives for an input channel missing from the output
/// layout, tried in order; the first set whose members all exist in the
/// output receives the energy. The outer list is the processing order:
/// narrower resolutions come after wider ones (TBR before TBC, since TBC's
/// spread relies on the side roles resolving on their own terms).
const CASCADE: &[(Channel, &[&[Channel]])] = &[
    (Channel::TBR, &[&[Channel::BR], &[Channel::SR], &[Channel::FR]]),
    (Channel::TBL, &[&[Channel::BL], &[Channel::SL], &[Channel::FL]]),
    (
        Channel::TBC,
        &[
            &[Channel::TBL, Channel::TBR],
            &[Channel::BL, Channel::BR],
            &[Channel::BC],
            &[Channel::FC],
        ],
    ),
    (Channel::TFR, &[&[Channel::FR]]),
    (Channel::TFL, &[&[Channel::FL]]),
    (
        Channel::TFC,
        &[
            &[Channel::TFL, Channel::TFR],
            &[Channel::FL, Channel::FR],
            &[Channel::FC],
        ],
    ),
    (
        Channel::TC,
        &[
            &[Channel::TFL, Channel::TFR],
            &[Channel::FL, Channel::FR],
            &[Channel::FC],
        ],
    ),
    (
        Channel::BC,
        &[
            &[Channel::BL, Channel::BR],
            &[Channel::SL, Channel::SR],
            &[Channel::FL, Channel::FR],
        ],
    ),
    (Channel::BR, &[&[Channel::SR], &[Channel::FR]]),
    (Channel::BL, &[&[Channel::SL], &[Channel::FL]]),
    (Channel::SR, &[&[Channel::BR], &[Channel::FR]]),
    (Channel::SL, &[&[Channel::BL], &[Channel::FL]]),
    (Channel::FROC, &[&[Channel::FR], &[Channel::FC]]),
    (Channel::FLOC, &[&[Channel::FL], &[Channel::FC]]),
    (Channel::LFE, &[&[Channel::FL, Channel::FR], &[Channel::FC]]),
    (Channel::FR, &[&[Channel::FC]]),
    (Channel::FL, &[&[Channel::FC]]),
];

/// Front-center fallback chain, tried in order when FC is absent from the
/// output. If none matches, matrix construction fails: there are not enough
/// channels to render center content.
const FC_CASCADE: &[&[Channel]] = &[
    &[Channel::TFC, Channel::FL, Channel::FR],
    &[Channel::TFC],
    &[Channel::FLOC, Channel::FROC],
    &[Channel::TC, Channel::FL, Channel::FR],
    &[Channel::FL, Channel::FR],
    &[Channel::TFL, Channel::TFR],
];

impl DownmixMatrix {
    /// Compute the weight matrix between two layouts.
    ///
    /// `final_stage` enables the optional normalization pass (when
    /// `normalize` is also set); intermediate remap stages stay unscaled so
    /// chained remaps do not attenuate twice.
    pub fn build(
        input: &ChannelLayout,
        output: &ChannelLayout,
        final_stage: bool,
        normalize: bool,
    ) -> Result<Self, RemapError> {
        if input.count() == 0 || output.count() == 0 {
            return Err(RemapError::EmptyLayout);
        }

        let mut matrix = Self {
            rows: vec![Vec::new(); output.count()],
            input_channels: input.count(),
        };

        // Mono center upmixes to dual-mono when both fronts exist
        if input.channels() == [Channel::FC] {
            if let (Some(fl), Some(fr)) = (output.position(Channel::FL), output.position(Channel::FR)) {
                matrix.add(fl, 0, 1.0);
                matrix.add(fr, 0, 1.0);
                if final_stage && normalize {
                    matrix.normalize();
                }
                return Ok(matrix);
            }
        }

        // Direct routes first: shared channels carry at unity gain
        let mut unresolved: Vec<(Channel, usize)> = Vec::new();
        for (index, &ch) in input.channels().iter().enumerate() {
            match output.position(ch) {
                Some(out) => matrix.add(out, index, 1.0),
                None => unresolved.push((ch, index)),
            }
        }

        // Fallback cascade in its fixed order, not input order
        for &(ch, alternatives) in CASCADE {
            if let Some(pos) = unresolved.iter().position(|&(c, _)| c == ch) {
                let (_, index) = unresolved.remove(pos);
                matrix.spread(output, alternatives, index, 1.0, ch.name())?;
            }
        }
        for (ch, index) in unresolved.drain(..) {
            if ch != Channel::FC {
                return Err(RemapError::InsufficientChannels(ch.name()));
            }
            matrix.spread(output, FC_CASCADE, index, 1.0, ch.name())?;
        }

        if final_stage && normalize {
            matrix.normalize();
        }

        log::debug!(
            "downmix matrix {} -> {}: max gain sum {:.3}",
            input,
            output,
            matrix.max_gain_sum()
        );
        Ok(matrix)
    }

    /// Route `weight` of source channel `source` into the first alternative
    /// target set fully present in the output layout.
    fn spread(
        &mut self,
        output: &ChannelLayout,
        alternatives: &[&[Channel]],
        source: usize,
        weight: f32,
        source_name: &'static str,
    ) -> Result<(), RemapError> {
        for &targets in alternatives {
            let positions: Vec<usize> = targets
                .iter()
                .filter_map(|&t| output.position(t))
                .collect();
            if positions.len() != targets.len() {
                continue;
            }
            let spread_weight = weight / (positions.len() as f32).sqrt();
            for pos in positions {
                self.add(pos, source, spread_weight);
            }
            return Ok(());
        }
        Err(RemapError::InsufficientChannels(source_name))
    }

    /// Add a contribution to an output channel. Merging into an entry this
    /// source already populated combines as (existing + incoming) /
    /// sqrt(fan_in + 1).
    fn add(&mut self, out: usize, source: usize, weight: f32) {
        let row = &mut self.rows[out];
        if let Some(entry) = row.iter_mut().find(|c| c.source == source) {
            entry.weight = (entry.weight + weight) / ((entry.fan_in + 1) as f32).sqrt();
            entry.fan_in += 1;
        } else {
            row.push(Contribution {
                source,
                weight,
                fan_in: 1,
            });
        }
    }

    /// Scale every weight so the largest per-output gain sum becomes 1.0
    fn normalize(&mut self) {
        let max = self.max_gain_sum();
        if max > 0.0 {
            let scale = 1.0 / max;
            for row in &mut self.rows {
                for entry in row.iter_mut() {
                    entry.weight *= scale;
                }
            }
        }
    }

    /// Largest sum of absolute gains across all output channels
    pub fn max_gain_sum(&self) -> f32 {
        self.rows
            .iter()
            .map(|row| row.iter().map(|c| c.weight.abs()).sum::<f32>())
            .fold(0.0, f32::max)
    }

    pub fn input_channels(&self) -> usize {
        self.input_channels
    }

    pub fn output_channels(&self) -> usize {
        self.rows.len()
    }

    /// Gains of one output channel as (source index, gain) pairs
    pub fn row(&self, out: usize) -> Vec<(usize, f32)> {
        self.rows[out].iter().map(|c| (c.source, c.weight)).collect()
    }

    /// Apply the matrix to `frames` interleaved frames.
    ///
    /// A single-contributor output channel is copied directly, preserving
    /// phase for matrixed surround content; anything else is a weighted sum.
    pub fn remap(&self, input: &[Sample], output: &mut [Sample], frames: usize) {
        let ic = self.input_channels;
        let oc = self.rows.len();
        debug_assert!(input.len() >= frames * ic);
        debug_assert!(output.len() >= frames * oc);

        for frame in 0..frames {
            let in_base = frame * ic;
            let out_base = frame * oc;
            for (o, row) in self.rows.iter().enumerate() {
                output[out_base + o] = match row.as_slice() {
                    [] => 0.0,
                    [single] if single.weight == 1.0 => input[in_base + single.source],
                    [single] => input[in_base + single.source] * single.weight,
                    many => many
                        .iter()
                        .map(|c| input[in_base + c.source] * c.weight)
                        .sum(),
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LayoutPreset;

    const EPS: f32 = 1e-5;

    #[test]
    fn test_identity_remap() {
        for preset in LayoutPreset::ALL {
            let layout = ChannelLayout::preset(preset);
            let matrix = DownmixMatrix::build(&layout, &layout, true, true).unwrap();

            let ch = layout.count();
            let frames = 4;
            let input: Vec<f32> = (0..frames * ch).map(|i| (i as f32) / 64.0 - 0.3).collect();
            let mut output = vec![0.0f32; frames * ch];
            matrix.remap(&input, &mut output, frames);
            assert_eq!(input, output, "identity failed for {:?}", preset);
        }
    }

    #[test]
    fn test_normalized_gain_sums_bounded() {
        for a in LayoutPreset::ALL {
            for b in LayoutPreset::ALL {
                let input = ChannelLayout::preset(a);
                let output = ChannelLayout::preset(b);
                let matrix = DownmixMatrix::build(&input, &output, true, true)
                    .unwrap_or_else(|e| panic!("{:?} -> {:?}: {}", a, b, e));
                assert!(
                    matrix.max_gain_sum() <= 1.0 + EPS,
                    "{:?} -> {:?}: max gain sum {}",
                    a,
                    b,
                    matrix.max_gain_sum()
                );
            }
        }
    }

    #[test]
    fn test_mono_center_upmixes_dual_mono() {
        let input = ChannelLayout::new(&[Channel::FC]).unwrap();
        let output = ChannelLayout::preset(LayoutPreset::Layout20);
        let matrix = DownmixMatrix::build(&input, &output, true, false).unwrap();

        // Same signal to both fronts at unity gain
        assert_eq!(matrix.row(0), vec![(0, 1.0)]);
        assert_eq!(matrix.row(1), vec![(0, 1.0)]);

        let input_samples = [0.25f32, -0.5];
        let mut out = [0.0f32; 4];
        matrix.remap(&input_samples, &mut out, 2);
        assert_eq!(out, [0.25, 0.25, -0.5, -0.5]);
    }

    #[test]
    fn test_center_unroutable_fails() {
        // Nothing in the output can carry center content
        let input = ChannelLayout::preset(LayoutPreset::Layout51);
        let output = ChannelLayout::new(&[Channel::BL, Channel::BR]).unwrap();
        assert!(matches!(
            DownmixMatrix::build(&input, &output, true, true),
            Err(RemapError::InsufficientChannels(_))
        ));
    }

    #[test]
    fn test_surround_folds_to_stereo() {
        let input = ChannelLayout::preset(LayoutPreset::Layout51);
        let output = ChannelLayout::preset(LayoutPreset::Layout20);
        let matrix = DownmixMatrix::build(&input, &output, true, true).unwrap();

        // Every input channel must land somewhere
        let mut reached = vec![false; input.count()];
        for o in 0..matrix.output_channels() {
            for (src, gain) in matrix.row(o) {
                assert!(gain > 0.0);
                reached[src] = true;
            }
        }
        assert!(reached.iter().all(|&r| r), "unrouted input channel");
    }

    #[test]
    fn test_spread_attenuates_by_sqrt() {
        // BC into plain stereo goes through FL/FR at 1/sqrt(2) before
        // normalization
        let input = ChannelLayout::new(&[Channel::BC]).unwrap();
        let output = ChannelLayout::preset(LayoutPreset::Layout20);
        let matrix = DownmixMatrix::build(&input, &output, false, false).unwrap();
        let expected = 1.0 / 2.0f32.sqrt();
        assert!((matrix.row(0)[0].1 - expected).abs() < EPS);
        assert!((matrix.row(1)[0].1 - expected).abs() < EPS);
    }
}
