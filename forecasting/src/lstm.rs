use ndarray::{Array1, Array2, Array3, ArrayD, ArrayViewD, ArrayViewMutD, Axis, Zip, concatenate, s};
use rand::distributions::{Distribution, Uniform};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

use crate::error::Result;

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn glorot_uniform<R: Rng + ?Sized>(fan_in: usize, fan_out: usize, rng: &mut R) -> Array2<f64> {
    let limit = (6.0 / (fan_in + fan_out) as f64).sqrt();
    let dist = Uniform::new_inclusive(-limit, limit);
    Array2::from_shape_fn((fan_in, fan_out), |_| dist.sample(rng))
}

/// One LSTM layer. Gate blocks in `w`, `u` and `b` are ordered
/// input, forget, cell, output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LstmLayer {
    units: usize,
    w: Array2<f64>,
    u: Array2<f64>,
    b: Array1<f64>,
}

struct StepCache {
    x: Array2<f64>,
    h_prev: Array2<f64>,
    c_prev: Array2<f64>,
    i: Array2<f64>,
    f: Array2<f64>,
    g: Array2<f64>,
    o: Array2<f64>,
    tanh_c: Array2<f64>,
}

#[derive(Debug, Clone)]
pub struct LayerGradients {
    pub w: Array2<f64>,
    pub u: Array2<f64>,
    pub b: Array1<f64>,
}

impl LstmLayer {
    pub fn new<R: Rng + ?Sized>(input_dim: usize, units: usize, rng: &mut R) -> Self {
        let w = glorot_uniform(input_dim, 4 * units, rng);
        let u = glorot_uniform(units, 4 * units, rng);
        let mut b = Array1::zeros(4 * units);
        b.slice_mut(s![units..2 * units]).fill(1.0);
        Self { units, w, u, b }
    }

    pub fn input_dim(&self) -> usize {
        self.w.nrows()
    }

    fn forward(&self, input: &Array3<f64>) -> (Array3<f64>, Vec<StepCache>) {
        let (batch, steps, _) = input.dim();
        let n = self.units;
        let mut h = Array2::zeros((batch, n));
        let mut c = Array2::zeros((batch, n));
        let mut outputs = Array3::zeros((batch, steps, n));
        let mut caches = Vec::with_capacity(steps);

        for t in 0..steps {
            let x = input.slice(s![.., t, ..]).to_owned();
            let z = x.dot(&self.w) + h.dot(&self.u) + &self.b;
            let i = z.slice(s![.., 0..n]).mapv(sigmoid);
            let f = z.slice(s![.., n..2 * n]).mapv(sigmoid);
            let g = z.slice(s![.., 2 * n..3 * n]).mapv(f64::tanh);
            let o = z.slice(s![.., 3 * n..]).mapv(sigmoid);

            let c_next = &f * &c + &i * &g;
            let tanh_c = c_next.mapv(f64::tanh);
            let h_next = &o * &tanh_c;
            outputs.slice_mut(s![.., t, ..]).assign(&h_next);

            caches.push(StepCache {
                x,
                h_prev: h,
                c_prev: c,
                i,
                f,
                g,
                o,
                tanh_c,
            });
            h = h_next;
            c = c_next;
        }

        (outputs, caches)
    }

    /// Backpropagation through time. Accumulates into `grads` and returns
    /// the gradient with respect to the layer input.
    fn backward(
        &self,
        caches: &[StepCache],
        d_out: &Array3<f64>,
        grads: &mut LayerGradients,
    ) -> Result<Array3<f64>> {
        let (batch, steps, _) = d_out.dim();
        let mut dx = Array3::zeros((batch, steps, self.input_dim()));
        let mut dh_next = Array2::<f64>::zeros((batch, self.units));
        let mut dc_next = Array2::<f64>::zeros((batch, self.units));

        for t in (0..steps).rev() {
            let cache = &caches[t];
            let dh = &d_out.slice(s![.., t, ..]) + &dh_next;

            let d_o = &dh * &cache.tanh_c * &cache.o.mapv(|v| v * (1.0 - v));
            let dc = &dh * &cache.o * &cache.tanh_c.mapv(|v| 1.0 - v * v) + &dc_next;
            let di = &dc * &cache.g * &cache.i.mapv(|v| v * (1.0 - v));
            let df = &dc * &cache.c_prev * &cache.f.mapv(|v| v * (1.0 - v));
            let dg = &dc * &cache.i * &cache.g.mapv(|v| 1.0 - v * v);
            dc_next = &dc * &cache.f;

            let dz = concatenate(Axis(1), &[di.view(), df.view(), dg.view(), d_o.view()])?;
            grads.w += &cache.x.t().dot(&dz);
            grads.u += &cache.h_prev.t().dot(&dz);
            grads.b += &dz.sum_axis(Axis(0));

            dx.slice_mut(s![.., t, ..]).assign(&dz.dot(&self.w.t()));
            dh_next = dz.dot(&self.u.t());
        }

        Ok(dx)
    }
}

impl LayerGradients {
    fn zeros_like(layer: &LstmLayer) -> Self {
        Self {
            w: Array2::zeros(layer.w.raw_dim()),
            u: Array2::zeros(layer.u.raw_dim()),
            b: Array1::zeros(layer.b.raw_dim()),
        }
    }
}

/// Stacked LSTM layers with inverted dropout after each, followed by a
/// dense head reading the last time step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LstmNetwork {
    layers: Vec<LstmLayer>,
    dense_w: Array2<f64>,
    dense_b: Array1<f64>,
    dropout: f64,
}

pub struct ForwardPass {
    pub predictions: Array1<f64>,
    caches: Vec<Vec<StepCache>>,
    masks: Vec<Option<Array3<f64>>>,
    last_hidden: Array2<f64>,
    steps: usize,
}

#[derive(Debug, Clone)]
pub struct Gradients {
    pub layers: Vec<LayerGradients>,
    pub dense_w: Array2<f64>,
    pub dense_b: Array1<f64>,
}

fn dropout_mask(dim: (usize, usize, usize), rate: f64, rng: &mut dyn RngCore) -> Array3<f64> {
    let keep = 1.0 - rate;
    Array3::from_shape_fn(dim, |_| if rng.gen_bool(keep) { 1.0 / keep } else { 0.0 })
}

impl LstmNetwork {
    pub fn new<R: Rng + ?Sized>(
        n_features: usize,
        units: usize,
        n_layers: usize,
        dropout: f64,
        rng: &mut R,
    ) -> Self {
        let layers = (0..n_layers)
            .map(|idx| {
                let input_dim = if idx == 0 { n_features } else { units };
                LstmLayer::new(input_dim, units, rng)
            })
            .collect();
        Self {
            layers,
            dense_w: glorot_uniform(units, 1, rng),
            dense_b: Array1::zeros(1),
            dropout,
        }
    }

    pub fn n_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn parameter_count(&self) -> usize {
        self.layers
            .iter()
            .map(|l| l.w.len() + l.u.len() + l.b.len())
            .sum::<usize>()
            + self.dense_w.len()
            + self.dense_b.len()
    }

    /// Inference on a `(batch, steps, features)` input.
    pub fn predict(&self, batch: &Array3<f64>) -> Array1<f64> {
        self.run(batch, None).predictions
    }

    /// Forward pass keeping what `backward` needs. Dropout is applied only
    /// when an RNG is supplied.
    pub fn run(&self, batch: &Array3<f64>, mut rng: Option<&mut dyn RngCore>) -> ForwardPass {
        let steps = batch.dim().1;
        let mut caches = Vec::with_capacity(self.layers.len());
        let mut masks = Vec::with_capacity(self.layers.len());
        let mut input = batch.to_owned();

        for layer in &self.layers {
            let (mut out, layer_caches) = layer.forward(&input);
            let mask = match rng.as_deref_mut() {
                Some(rng) if self.dropout > 0.0 => {
                    let mask = dropout_mask(out.dim(), self.dropout, rng);
                    out *= &mask;
                    Some(mask)
                }
                _ => None,
            };
            caches.push(layer_caches);
            masks.push(mask);
            input = out;
        }

        let last_hidden = input.slice(s![.., steps - 1, ..]).to_owned();
        let predictions = last_hidden.dot(&self.dense_w).column(0).to_owned() + self.dense_b[0];

        ForwardPass {
            predictions,
            caches,
            masks,
            last_hidden,
            steps,
        }
    }

    /// Gradients of a loss whose derivative with respect to each prediction
    /// is `d_pred`.
    pub fn backward(&self, pass: &ForwardPass, d_pred: &Array1<f64>) -> Result<Gradients> {
        let d_col = d_pred.view().insert_axis(Axis(1));
        let dense_w = pass.last_hidden.t().dot(&d_col);
        let dense_b = Array1::from_elem(1, d_pred.sum());
        let dh_last = d_col.dot(&self.dense_w.t());

        let (batch, units) = pass.last_hidden.dim();
        let mut d_out = Array3::zeros((batch, pass.steps, units));
        d_out.slice_mut(s![.., pass.steps - 1, ..]).assign(&dh_last);

        let mut layers: Vec<LayerGradients> =
            self.layers.iter().map(LayerGradients::zeros_like).collect();
        for (idx, layer) in self.layers.iter().enumerate().rev() {
            if let Some(mask) = &pass.masks[idx] {
                d_out *= mask;
            }
            d_out = layer.backward(&pass.caches[idx], &d_out, &mut layers[idx])?;
        }

        Ok(Gradients {
            layers,
            dense_w,
            dense_b,
        })
    }

    pub fn apply(&mut self, grads: &Gradients, optimizer: &mut Adam) {
        optimizer.next_step();
        let mut slot = 0;
        for (layer, g) in self.layers.iter_mut().zip(&grads.layers) {
            optimizer.update(slot, layer.w.view_mut().into_dyn(), g.w.view().into_dyn());
            optimizer.update(slot + 1, layer.u.view_mut().into_dyn(), g.u.view().into_dyn());
            optimizer.update(slot + 2, layer.b.view_mut().into_dyn(), g.b.view().into_dyn());
            slot += 3;
        }
        optimizer.update(slot, self.dense_w.view_mut().into_dyn(), grads.dense_w.view().into_dyn());
        optimizer.update(slot + 1, self.dense_b.view_mut().into_dyn(), grads.dense_b.view().into_dyn());
    }
}

/// Adam with per-tensor first and second moments.
#[derive(Debug, Clone)]
pub struct Adam {
    learning_rate: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    step: i32,
    m: Vec<ArrayD<f64>>,
    v: Vec<ArrayD<f64>>,
}

impl Adam {
    pub fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            step: 0,
            m: Vec::new(),
            v: Vec::new(),
        }
    }

    fn next_step(&mut self) {
        self.step += 1;
    }

    fn update(&mut self, slot: usize, mut param: ArrayViewMutD<f64>, grad: ArrayViewD<f64>) {
        if self.m.len() <= slot {
            self.m.resize_with(slot + 1, || ArrayD::zeros(vec![0]));
            self.v.resize_with(slot + 1, || ArrayD::zeros(vec![0]));
        }
        if self.m[slot].shape() != grad.shape() {
            self.m[slot] = ArrayD::zeros(grad.raw_dim());
            self.v[slot] = ArrayD::zeros(grad.raw_dim());
        }

        let (b1, b2, eps) = (self.beta1, self.beta2, self.epsilon);
        let lr_t = self.learning_rate * (1.0 - b2.powi(self.step)).sqrt() / (1.0 - b1.powi(self.step));
        let m = &mut self.m[slot];
        let v = &mut self.v[slot];

        Zip::from(&mut param)
            .and(m)
            .and(v)
            .and(&grad)
            .for_each(|p, m, v, &g| {
                *m = b1 * *m + (1.0 - b1) * g;
                *v = b2 * *v + (1.0 - b2) * g * g;
                *p -= lr_t * *m / (v.sqrt() + eps);
            });
    }
}
