use graphport_core::{DType, Error, ExecContext, Graph, Node, Result, Shape, Tensor};

use tracing::trace;

use super::CustomOp;

/// Sliding-window patch extraction over an NHWC tensor.
///
/// Attributes: `kernel_size`, `stride`, optional `pad_amount` (applied to
/// every spatial edge), optional `pad_value` and optional `input_shape`
/// (`"(N,H,W,C)"`, checked against the bound input). The output is
/// `[N, OH, OW, K*K*C]`, each patch laid out (ky, kx, c).
#[derive(Clone, Copy, Debug, Default)]
pub struct Im2Col;

struct Params {
    kernel: usize,
    stride: usize,
    pad: usize,
    pad_value: f32,
}

impl Params {
    fn from_node(node: &Node) -> Result<Self> {
        let positive = |key: &str, value: i64| {
            usize::try_from(value)
                .ok()
                .filter(|v| *v > 0)
                .ok_or_else(|| Error::invalid_node(node.label(), format!("`{key}` must be > 0")))
        };
        let kernel = positive("kernel_size", node.attr_int("kernel_size")?)?;
        let stride = positive("stride", node.attr_int("stride")?)?;
        let pad = usize::try_from(node.attr_int_or("pad_amount", 0)?)
            .map_err(|_| Error::invalid_node(node.label(), "`pad_amount` must be >= 0"))?;
        let pad_value = node.attr_float_or("pad_value", 0.0)?;
        Ok(Self {
            kernel,
            stride,
            pad,
            pad_value,
        })
    }
}

impl CustomOp for Im2Col {
    fn execute(&self, node: &Node, ctx: &mut ExecContext, _graph: &Graph) -> Result<()> {
        let (Some(input_name), Some(output_name)) =
            (node.present_inputs().next(), node.present_outputs().next())
        else {
            return Err(Error::invalid_node(
                node.label(),
                "Im2Col needs one input and one output",
            ));
        };
        let params = Params::from_node(node)?;

        let input = ctx.get(input_name)?;
        if input.dtype() != DType::F32 {
            return Err(Error::invalid_node(node.label(), "Im2Col expects f32 input"));
        }
        let &[n, h, w, c] = input.shape().dims() else {
            return Err(Error::invalid_node(
                node.label(),
                format!("Im2Col expects an NHWC input, got {}", input.shape()),
            ));
        };
        if node.attr("input_shape").is_some() {
            let declared = parse_shape(node.attr_str("input_shape")?)
                .ok_or_else(|| Error::invalid_node(node.label(), "malformed `input_shape`"))?;
            if declared != *input.shape() {
                return Err(Error::ShapeMismatch {
                    tensor: input_name.to_string(),
                    found: input.shape().clone(),
                    expected: declared,
                });
            }
        }

        let k = params.kernel;
        let padded = |dim: usize| params.pad.checked_mul(2).and_then(|p| p.checked_add(dim));
        let (Some(ph), Some(pw)) = (padded(h), padded(w)) else {
            return Err(Error::invalid_node(node.label(), "`pad_amount` is too large"));
        };
        if ph < k || pw < k {
            return Err(Error::invalid_node(
                node.label(),
                format!("kernel {k} does not fit padded input {ph}x{pw}"),
            ));
        }
        let oh = (ph - k) / params.stride + 1;
        let ow = (pw - k) / params.stride + 1;

        let too_large = || Error::invalid_node(node.label(), "Im2Col output is too large");
        let patch = k
            .checked_mul(k)
            .and_then(|kk| kk.checked_mul(c))
            .ok_or_else(too_large)?;
        let out_shape = Shape::from([n, oh, ow, patch]);
        let out_len = out_shape.checked_numel().ok_or_else(too_large)?;

        let x = input.to_vec::<f32>()?;
        let at = |b: usize, y: usize, xx: usize, ch: usize| -> f32 {
            // (y, xx) are coordinates in the padded frame.
            if y < params.pad || xx < params.pad || y - params.pad >= h || xx - params.pad >= w {
                params.pad_value
            } else {
                x[((b * h + (y - params.pad)) * w + (xx - params.pad)) * c + ch]
            }
        };

        let mut out = Vec::with_capacity(out_len);
        for b in 0..n {
            for oy in 0..oh {
                for ox in 0..ow {
                    for ky in 0..k {
                        for kx in 0..k {
                            for ch in 0..c {
                                out.push(at(b, oy * params.stride + ky, ox * params.stride + kx, ch));
                            }
                        }
                    }
                }
            }
        }

        let result = Tensor::from_slice(out_shape, &out)?;
        trace!(
            node = node.label(),
            kernel = k,
            stride = params.stride,
            output = %result.shape(),
            "im2col"
        );
        ctx.store(output_name, result)
    }
}

/// Parses `"(1,4,4,1)"` or `"[1, 4, 4, 1]"`.
fn parse_shape(raw: &str) -> Option<Shape> {
    let inner = raw
        .trim()
        .trim_start_matches(['(', '['])
        .trim_end_matches([')', ']']);
    let dims = inner
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(|d| d.parse::<usize>().ok())
        .collect::<Option<Vec<_>>>()?;
    Some(Shape::from_slice(&dims))
}
