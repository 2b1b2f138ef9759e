use burn::module::{Module, Param};
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig};
use burn::tensor::backend::Backend;
use burn::tensor::{Distribution, Tensor, activation};

/// Long short-term memory layer with input and recurrent dropout.
///
/// Both dropout masks are sampled once per forward pass and reused at every
/// time step, and are only applied while the backend tracks gradients.
#[derive(Module, Debug)]
pub struct LstmLayer<B: Backend> {
    input: Linear<B>,
    recurrent: Linear<B>,
    dropout: Dropout,
    recurrent_dropout: Dropout,
    hidden_dim: usize,
}

impl<B: Backend> LstmLayer<B> {
    pub fn new(
        d_input: usize,
        d_hidden: usize,
        dropout: f64,
        recurrent_dropout: f64,
        device: &B::Device,
    ) -> Self {
        let mut input = LinearConfig::new(d_input, 4 * d_hidden).init(device);
        input.bias = Some(Param::from_tensor(gate_bias::<B>(d_hidden, device)));

        Self {
            input,
            recurrent: LinearConfig::new(d_hidden, 4 * d_hidden)
                .with_bias(false)
                .init(device),
            dropout: DropoutConfig::new(dropout).init(),
            recurrent_dropout: DropoutConfig::new(recurrent_dropout).init(),
            hidden_dim: d_hidden,
        }
    }

    /// `[batch, time, d_input]` to the hidden state at every step,
    /// `[batch, time, hidden]`.
    pub fn forward_sequence(&self, input: Tensor<B, 3>) -> Tensor<B, 3> {
        let (outputs, _) = self.scan(input, true);
        Tensor::cat(outputs, 1)
    }

    /// `[batch, time, d_input]` to the final hidden state, `[batch, hidden]`.
    pub fn forward_last(&self, input: Tensor<B, 3>) -> Tensor<B, 2> {
        let (_, hidden) = self.scan(input, false);
        hidden
    }

    fn scan(&self, input: Tensor<B, 3>, keep_sequence: bool) -> (Vec<Tensor<B, 3>>, Tensor<B, 2>) {
        let [batch, time, d_input] = input.dims();
        let device = input.device();
        let h = self.hidden_dim;

        let input = match variational_mask::<B>(self.dropout.prob, [batch, d_input], &device) {
            Some(mask) => input * mask.unsqueeze_dim::<3>(1),
            None => input,
        };
        let recurrent_mask =
            variational_mask::<B>(self.recurrent_dropout.prob, [batch, h], &device);

        // Input contributions for all steps at once: [batch, time, 4h].
        let projected = self.input.forward(input);

        let mut hidden = Tensor::<B, 2>::zeros([batch, h], &device);
        let mut cell = Tensor::<B, 2>::zeros([batch, h], &device);
        let mut outputs = Vec::with_capacity(if keep_sequence { time } else { 0 });

        for step in 0..time {
            let x_t = projected
                .clone()
                .slice_dim(1, step..step + 1)
                .reshape([batch, 4 * h]);
            let h_in = match &recurrent_mask {
                Some(mask) => hidden.clone() * mask.clone(),
                None => hidden.clone(),
            };
            let gates = x_t + self.recurrent.forward(h_in);

            let input_gate = activation::sigmoid(gates.clone().slice_dim(1, 0..h));
            let forget_gate = activation::sigmoid(gates.clone().slice_dim(1, h..2 * h));
            let candidate = gates.clone().slice_dim(1, 2 * h..3 * h).tanh();
            let output_gate = activation::sigmoid(gates.slice_dim(1, 3 * h..4 * h));

            cell = forget_gate * cell + input_gate * candidate;
            hidden = output_gate * cell.clone().tanh();

            if keep_sequence {
                outputs.push(hidden.clone().unsqueeze_dim::<3>(1));
            }
        }

        (outputs, hidden)
    }
}

/// Gate bias with the forget block set to one so early steps keep the cell.
fn gate_bias<B: Backend>(d_hidden: usize, device: &B::Device) -> Tensor<B, 1> {
    Tensor::cat(
        vec![
            Tensor::zeros([d_hidden], device),
            Tensor::ones([d_hidden], device),
            Tensor::zeros([2 * d_hidden], device),
        ],
        0,
    )
}

fn variational_mask<B: Backend>(
    prob: f64,
    shape: [usize; 2],
    device: &B::Device,
) -> Option<Tensor<B, 2>> {
    if !B::ad_enabled() || prob <= 0.0 {
        return None;
    }
    let keep = 1.0 - prob;
    Some(Tensor::<B, 2>::random(shape, Distribution::Bernoulli(keep), device).div_scalar(keep))
}
