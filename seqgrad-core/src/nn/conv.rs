//! Strided 2-D convolution over channel-minor `Tensor3` inputs.

use crate::autofunc::{
    upstream_or_zeros, Gradient, RGradient, RResultNode, RResultRef, RVector, ResultNode,
    ResultRef, Variable,
};
use crate::error::SeqGradError;
use crate::nn::layer::Layer;
use crate::ops;
use crate::tensor3::Tensor3;
use log::{debug, trace};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use std::cell::Ref;
use std::rc::Rc;

const SERIALIZER_TYPE: &str = "seqgrad.Conv";
const UNINIT_MESSAGE: &str = "Conv layer used before its parameters were allocated";

/// Geometry of a convolution layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvConfig {
    pub filter_count: usize,
    pub filter_width: usize,
    pub filter_height: usize,
    pub stride: usize,

    pub input_width: usize,
    pub input_height: usize,
    pub input_depth: usize,
}

impl ConvConfig {
    pub fn validate(&self) -> Result<(), SeqGradError> {
        if self.stride == 0 {
            return Err(SeqGradError::InvalidConfig("stride must be positive".to_string()));
        }
        if self.filter_width == 0 || self.filter_height == 0 {
            return Err(SeqGradError::InvalidConfig(format!(
                "filter size {}x{} must be non-empty",
                self.filter_width, self.filter_height
            )));
        }
        if self.input_depth == 0 {
            return Err(SeqGradError::InvalidConfig(
                "input depth must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// `max(0, 1 + floor((input_width - filter_width) / stride))`
    pub fn output_width(&self) -> usize {
        output_extent(self.input_width, self.filter_width, self.stride)
    }

    pub fn output_height(&self) -> usize {
        output_extent(self.input_height, self.filter_height, self.stride)
    }

    pub fn output_depth(&self) -> usize {
        self.filter_count
    }

    pub fn input_len(&self) -> usize {
        self.input_width * self.input_height * self.input_depth
    }

    pub fn output_len(&self) -> usize {
        self.output_width() * self.output_height() * self.output_depth()
    }

    fn filter_len(&self) -> usize {
        self.filter_width * self.filter_height * self.input_depth
    }

    fn input_tensor<'a>(&self, data: &'a [f64]) -> Tensor3<&'a [f64]> {
        Tensor3::from_data(self.input_width, self.input_height, self.input_depth, data)
    }

    fn output_tensor<'a>(&self, data: &'a [f64]) -> Tensor3<&'a [f64]> {
        Tensor3::from_data(
            self.output_width(),
            self.output_height(),
            self.output_depth(),
            data,
        )
    }

    fn filter_tensor<'a>(&self, data: &'a [f64]) -> Tensor3<&'a [f64]> {
        Tensor3::from_data(self.filter_width, self.filter_height, self.input_depth, data)
    }

    fn new_input(&self) -> Tensor3 {
        Tensor3::new(self.input_width, self.input_height, self.input_depth)
    }

    fn new_filter(&self) -> Tensor3 {
        Tensor3::new(self.filter_width, self.filter_height, self.input_depth)
    }
}

fn output_extent(input: usize, filter: usize, stride: usize) -> usize {
    if input < filter {
        0
    } else {
        1 + (input - filter) / stride
    }
}

/// Filter and bias variables. Each filter variable's buffer is laid out as a
/// `filter_width x filter_height x input_depth` tensor.
#[derive(Debug, Clone)]
struct ConvParams {
    filters: Vec<Variable>,
    biases: Variable,
}

impl ConvParams {
    fn zeros(config: &ConvConfig) -> Self {
        ConvParams {
            filters: (0..config.filter_count)
                .map(|_| Variable::zeros(config.filter_len()))
                .collect(),
            biases: Variable::zeros(config.filter_count),
        }
    }

    fn variables(&self) -> impl Iterator<Item = &Variable> {
        std::iter::once(&self.biases).chain(self.filters.iter())
    }

    fn filter_values(&self) -> Vec<Ref<'_, Vec<f64>>> {
        self.filters.iter().map(|f| f.value()).collect()
    }

    fn filter_accumulators(&self, config: &ConvConfig, g: &Gradient) -> Vec<Option<Tensor3>> {
        self.filters
            .iter()
            .map(|f| g.contains(f.id()).then(|| config.new_filter()))
            .collect()
    }

    fn bias_accumulator(&self, g: &Gradient) -> Option<Vec<f64>> {
        g.contains(self.biases.id())
            .then(|| vec![0.0; self.biases.len()])
    }

    fn flush(&self, g: &mut Gradient, filters: Vec<Option<Tensor3>>, bias: Option<Vec<f64>>) {
        for (var, acc) in self.filters.iter().zip(filters) {
            if let Some(acc) = acc {
                g.accumulate(var.id(), acc.data());
            }
        }
        if let Some(acc) = bias {
            g.accumulate(self.biases.id(), &acc);
        }
    }

    /// Directions of each filter in `v`, absent entries meaning zero.
    fn filter_directions(&self, config: &ConvConfig, v: &RVector) -> Vec<Option<Vec<f64>>> {
        self.filters
            .iter()
            .map(|f| {
                v.get(f.id()).map(|dir| {
                    assert_eq!(dir.len(), config.filter_len(), "filter direction has wrong length");
                    dir.to_vec()
                })
            })
            .collect()
    }
}

/// A convolution layer: `filter_count` filters slid over the input with a
/// fixed stride, plus one bias per filter.
#[derive(Debug)]
pub struct Conv {
    config: ConvConfig,
    params: Option<ConvParams>,
}

#[derive(Serialize, Deserialize)]
struct ConvRecord {
    #[serde(rename = "type")]
    kind: String,
    #[serde(flatten)]
    config: ConvConfig,
    filters: Vec<FilterRecord>,
    biases: Vec<f64>,
}

#[derive(Serialize, Deserialize)]
struct FilterRecord {
    width: usize,
    height: usize,
    depth: usize,
    data: Vec<f64>,
}

impl Conv {
    /// Creates a layer without parameters. Call [`randomize`](Conv::randomize)
    /// before using it.
    pub fn new(config: ConvConfig) -> Result<Self, SeqGradError> {
        config.validate()?;
        debug!(
            "Conv: {} filters {}x{} stride {} over {}x{}x{}",
            config.filter_count,
            config.filter_width,
            config.filter_height,
            config.stride,
            config.input_width,
            config.input_height,
            config.input_depth
        );
        Ok(Conv {
            config,
            params: None,
        })
    }

    /// Creates a layer from explicit filters and biases. Each value is copied
    /// into a freshly allocated variable.
    pub fn from_parameters(
        config: ConvConfig,
        filters: Vec<Tensor3>,
        biases: Vec<f64>,
    ) -> Result<Self, SeqGradError> {
        config.validate()?;
        if filters.len() != config.filter_count {
            return Err(SeqGradError::ParameterShape {
                what: "filter list".to_string(),
                expected: config.filter_count,
                actual: filters.len(),
            });
        }
        if biases.len() != config.filter_count {
            return Err(SeqGradError::ParameterShape {
                what: "bias vector".to_string(),
                expected: config.filter_count,
                actual: biases.len(),
            });
        }
        let expected_dims = (config.filter_width, config.filter_height, config.input_depth);
        let mut filter_vars = Vec::with_capacity(filters.len());
        for (i, filter) in filters.into_iter().enumerate() {
            let dims = (filter.width(), filter.height(), filter.depth());
            if dims != expected_dims {
                return Err(SeqGradError::InvalidConfig(format!(
                    "filter {} is {}x{}x{}, expected {}x{}x{}",
                    i, dims.0, dims.1, dims.2, expected_dims.0, expected_dims.1, expected_dims.2
                )));
            }
            filter_vars.push(Variable::new(filter.into_data()));
        }
        Ok(Conv {
            config,
            params: Some(ConvParams {
                filters: filter_vars,
                biases: Variable::new(biases),
            }),
        })
    }

    pub fn config(&self) -> &ConvConfig {
        &self.config
    }

    pub fn output_width(&self) -> usize {
        self.config.output_width()
    }

    pub fn output_height(&self) -> usize {
        self.config.output_height()
    }

    pub fn output_depth(&self) -> usize {
        self.config.output_depth()
    }

    fn params(&self) -> &ConvParams {
        self.params.as_ref().expect(UNINIT_MESSAGE)
    }

    /// The filter variables, in filter order.
    ///
    /// # Panics
    /// Panics if the parameters were never allocated.
    pub fn filters(&self) -> &[Variable] {
        &self.params().filters
    }

    /// The bias variable (one entry per filter).
    pub fn biases(&self) -> &Variable {
        &self.params().biases
    }

    /// Randomly initializes filters and biases, allocating them first if
    /// needed. Existing variables keep their identity.
    pub fn randomize(&mut self) {
        self.randomize_with(&mut rand::thread_rng());
    }

    pub fn randomize_with<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let config = self.config;
        if self.params.is_none() {
            debug!("Conv: allocating {} filters", config.filter_count);
        }
        let params = self.params.get_or_insert_with(|| ConvParams::zeros(&config));
        let scale = 1.0 / (config.filter_len() as f64).sqrt();
        for filter in &params.filters {
            for w in filter.value_mut().iter_mut() {
                let sample: f64 = rng.sample(StandardNormal);
                *w = sample * scale;
            }
        }
        for b in params.biases.value_mut().iter_mut() {
            *b = rng.gen_range(-1.0..1.0);
        }
    }

    pub fn serializer_type(&self) -> &'static str {
        SERIALIZER_TYPE
    }

    /// Encodes the configuration, filters and biases as JSON.
    ///
    /// # Panics
    /// Panics if the parameters were never allocated.
    pub fn serialize(&self) -> Result<Vec<u8>, SeqGradError> {
        let params = self.params();
        let cfg = &self.config;
        let record = ConvRecord {
            kind: SERIALIZER_TYPE.to_string(),
            config: *cfg,
            filters: params
                .filters
                .iter()
                .map(|f| FilterRecord {
                    width: cfg.filter_width,
                    height: cfg.filter_height,
                    depth: cfg.input_depth,
                    data: f.to_vec(),
                })
                .collect(),
            biases: params.biases.to_vec(),
        };
        let data = serde_json::to_vec(&record)?;
        debug!("Conv: serialized {} filters into {} bytes", cfg.filter_count, data.len());
        Ok(data)
    }

    /// Decodes a layer written by [`serialize`](Conv::serialize). Filters
    /// keep their order and every parameter gets a fresh variable.
    pub fn deserialize(data: &[u8]) -> Result<Self, SeqGradError> {
        let record: ConvRecord = serde_json::from_slice(data)?;
        if record.kind != SERIALIZER_TYPE {
            return Err(SeqGradError::WrongSerializerType {
                expected: SERIALIZER_TYPE.to_string(),
                actual: record.kind,
            });
        }
        let mut filters = Vec::with_capacity(record.filters.len());
        for (i, f) in record.filters.into_iter().enumerate() {
            let expected = f.width * f.height * f.depth;
            if f.data.len() != expected {
                return Err(SeqGradError::ParameterShape {
                    what: format!("filter {}", i),
                    expected,
                    actual: f.data.len(),
                });
            }
            filters.push(Tensor3::from_data(f.width, f.height, f.depth, f.data));
        }
        debug!("Conv: deserialized {} filters", filters.len());
        Conv::from_parameters(record.config, filters, record.biases)
    }
}

impl Layer for Conv {
    fn apply(&self, input: ResultRef) -> ResultRef {
        let params = self.params().clone();
        let output = convolve(&self.config, &params, input.output());
        trace!("Conv::apply -> {}x{}x{}", output.width(), output.height(), output.depth());
        Rc::new(ConvResult {
            output,
            input,
            config: self.config,
            params,
        })
    }

    fn apply_r(&self, v: &RVector, input: RResultRef) -> RResultRef {
        let params = self.params().clone();
        let filters_r = params.filter_directions(&self.config, v);
        let bias_r = v.get(params.biases.id());
        let output = convolve(&self.config, &params, input.output());
        let r_output = convolve_r(
            &self.config,
            &params,
            &filters_r,
            bias_r,
            input.output(),
            input.r_output(),
        );
        trace!("Conv::apply_r -> {}x{}x{}", output.width(), output.height(), output.depth());
        Rc::new(ConvRResult {
            output,
            r_output,
            input,
            config: self.config,
            params,
            filters_r,
        })
    }

    /// The bias variable followed by the filter variables.
    ///
    /// # Panics
    /// Panics if the parameters were never allocated.
    fn parameters(&self) -> Vec<Variable> {
        self.params().variables().cloned().collect()
    }
}

fn convolve(config: &ConvConfig, params: &ConvParams, input: &[f64]) -> Tensor3 {
    let in_tensor = config.input_tensor(input);
    let mut cropped = config.new_filter();
    let mut out = Tensor3::new(
        config.output_width(),
        config.output_height(),
        config.output_depth(),
    );

    let filters = params.filter_values();
    let biases = params.biases.value();
    assert_eq!(biases.len(), config.filter_count, "bias vector has wrong length");

    for y in 0..out.height() {
        let input_y = y * config.stride;
        for x in 0..out.width() {
            let input_x = x * config.stride;
            in_tensor.crop(input_x, input_y, &mut cropped);
            for (z, filter) in filters.iter().enumerate() {
                let filter = config.filter_tensor(filter.as_slice());
                let dot = ops::dot(filter.data(), cropped.data());
                out.set(x, y, z, dot + biases[z]);
            }
        }
    }
    out
}

fn convolve_r(
    config: &ConvConfig,
    params: &ConvParams,
    filters_r: &[Option<Vec<f64>>],
    bias_r: Option<&[f64]>,
    input: &[f64],
    input_r: &[f64],
) -> Tensor3 {
    let in_tensor = config.input_tensor(input);
    let in_tensor_r = config.input_tensor(input_r);
    let mut cropped = config.new_filter();
    let mut cropped_r = config.new_filter();
    let mut out = Tensor3::new(
        config.output_width(),
        config.output_height(),
        config.output_depth(),
    );
    if let Some(bias_r) = bias_r {
        assert_eq!(bias_r.len(), config.filter_count, "bias direction has wrong length");
    }

    let filters = params.filter_values();
    for y in 0..out.height() {
        let input_y = y * config.stride;
        for x in 0..out.width() {
            let input_x = x * config.stride;
            in_tensor.crop(input_x, input_y, &mut cropped);
            in_tensor_r.crop(input_x, input_y, &mut cropped_r);
            for (z, filter) in filters.iter().enumerate() {
                let mut value = ops::dot(filter.as_slice(), cropped_r.data());
                if let Some(filter_r) = &filters_r[z] {
                    value += ops::dot(filter_r.as_slice(), cropped.data());
                }
                if let Some(bias_r) = bias_r {
                    value += bias_r[z];
                }
                out.set(x, y, z, value);
            }
        }
    }
    out
}

struct ConvResult {
    output: Tensor3,
    input: ResultRef,
    config: ConvConfig,
    params: ConvParams,
}

impl ResultNode for ConvResult {
    fn output(&self) -> &[f64] {
        self.output.data()
    }

    fn constant(&self, g: &Gradient) -> bool {
        self.input.constant(g) && self.params.variables().all(|v| v.constant(g))
    }

    fn propagate_gradient(&self, upstream: Option<&[f64]>, g: &mut Gradient) {
        let cfg = &self.config;
        let upstream = upstream_or_zeros(upstream, self.output.data().len());
        let downstream = cfg.output_tensor(&upstream[..]);
        let input = cfg.input_tensor(self.input.output());

        let mut filter_grads = self.params.filter_accumulators(cfg, g);
        let mut bias_grad = self.params.bias_accumulator(g);
        let mut input_grad = (!self.input.constant(g)).then(|| cfg.new_input());
        let mut temp_input_grad = input_grad.as_ref().map(|_| cfg.new_filter());
        let mut cropped = cfg.new_filter();

        {
            let filters = self.params.filter_values();
            for y in 0..self.output.height() {
                let input_y = y * cfg.stride;
                for x in 0..self.output.width() {
                    let input_x = x * cfg.stride;
                    if let Some(temp) = temp_input_grad.as_mut() {
                        temp.fill(0.0);
                    }
                    input.crop(input_x, input_y, &mut cropped);
                    for (z, filter) in filters.iter().enumerate() {
                        let partial = downstream.get(x, y, z);
                        if let Some(filter_grad) = filter_grads[z].as_mut() {
                            ops::axpy(filter_grad.data_mut(), partial, cropped.data());
                        }
                        if let Some(bias_grad) = bias_grad.as_mut() {
                            bias_grad[z] += partial;
                        }
                        if let Some(temp) = temp_input_grad.as_mut() {
                            ops::axpy(temp.data_mut(), partial, filter.as_slice());
                        }
                    }
                    if let (Some(input_grad), Some(temp)) =
                        (input_grad.as_mut(), temp_input_grad.as_ref())
                    {
                        input_grad.mul_add(input_x as isize, input_y as isize, temp, 1.0);
                    }
                }
            }
        }

        self.params.flush(g, filter_grads, bias_grad);
        if let Some(input_grad) = input_grad {
            self.input.propagate_gradient(Some(input_grad.data()), g);
        }
    }
}

struct ConvRResult {
    output: Tensor3,
    r_output: Tensor3,
    input: RResultRef,
    config: ConvConfig,
    params: ConvParams,
    filters_r: Vec<Option<Vec<f64>>>,
}

impl RResultNode for ConvRResult {
    fn output(&self) -> &[f64] {
        self.output.data()
    }

    fn r_output(&self) -> &[f64] {
        self.r_output.data()
    }

    fn constant(&self, rg: &RGradient, g: &Gradient) -> bool {
        self.input.constant(rg, g)
            && self
                .params
                .variables()
                .all(|v| !g.contains(v.id()) && !rg.contains(v.id()))
    }

    fn propagate_r_gradient(
        &self,
        upstream: Option<&[f64]>,
        upstream_r: Option<&[f64]>,
        rg: &mut RGradient,
        g: &mut Gradient,
    ) {
        let cfg = &self.config;
        let n = self.output.data().len();
        let upstream = upstream_or_zeros(upstream, n);
        let upstream_r = upstream_or_zeros(upstream_r, n);
        let downstream = cfg.output_tensor(&upstream[..]);
        let downstream_r = cfg.output_tensor(&upstream_r[..]);
        let input = cfg.input_tensor(self.input.output());
        let input_r = cfg.input_tensor(self.input.r_output());

        let mut filter_grads = self.params.filter_accumulators(cfg, g);
        let mut filter_grads_r = self.params.filter_accumulators(cfg, &**rg);
        let mut bias_grad = self.params.bias_accumulator(g);
        let mut bias_grad_r = self.params.bias_accumulator(&**rg);
        let mut input_grads =
            (!self.input.constant(rg, g)).then(|| (cfg.new_input(), cfg.new_input()));

        {
            let filters = self.params.filter_values();
            for y in 0..self.output.height() {
                let input_y = (y * cfg.stride) as isize;
                for x in 0..self.output.width() {
                    let input_x = (x * cfg.stride) as isize;
                    for (z, filter) in filters.iter().enumerate() {
                        let partial = downstream.get(x, y, z);
                        let partial_r = downstream_r.get(x, y, z);
                        // A negative offset gathers the filter-sized window
                        // at (input_x, input_y) out of the whole input.
                        if let Some(filter_grad) = filter_grads[z].as_mut() {
                            filter_grad.mul_add(-input_x, -input_y, &input, partial);
                        }
                        if let Some(filter_grad_r) = filter_grads_r[z].as_mut() {
                            filter_grad_r.mul_add(-input_x, -input_y, &input, partial_r);
                            filter_grad_r.mul_add(-input_x, -input_y, &input_r, partial);
                        }
                        if let Some(bias_grad) = bias_grad.as_mut() {
                            bias_grad[z] += partial;
                        }
                        if let Some(bias_grad_r) = bias_grad_r.as_mut() {
                            bias_grad_r[z] += partial_r;
                        }
                        if let Some((input_grad, input_grad_r)) = input_grads.as_mut() {
                            let filter = cfg.filter_tensor(filter.as_slice());
                            input_grad.mul_add(input_x, input_y, &filter, partial);
                            input_grad_r.mul_add(input_x, input_y, &filter, partial_r);
                            if let Some(filter_r) = &self.filters_r[z] {
                                let filter_r = cfg.filter_tensor(filter_r.as_slice());
                                input_grad_r.mul_add(input_x, input_y, &filter_r, partial);
                            }
                        }
                    }
                }
            }
        }

        self.params.flush(g, filter_grads, bias_grad);
        self.params.flush(&mut **rg, filter_grads_r, bias_grad_r);
        if let Some((input_grad, input_grad_r)) = input_grads {
            self.input.propagate_r_gradient(
                Some(input_grad.data()),
                Some(input_grad_r.data()),
                rg,
                g,
            );
        }
    }
}

#[cfg(test)]
#[path = "conv_test.rs"]
mod tests;
