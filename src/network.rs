use std::error::Error;
use std::fmt;
use std::io::{Cursor, Read};

use arrayvec::ArrayVec;
use byteorder::{LittleEndian, ReadBytesExt};
use once_cell::sync::OnceCell;
use shakmaty::{Color, Role, Square};

use crate::types::Score;

pub const INPUT: usize = 768; // 12 piece kinds x 64 squares, White's view
pub const HIDDEN_1: usize = 256;
pub const HIDDEN_2: usize = 32;

/// Quantisation scale. Chosen so that first-layer sums stay inside i16:
/// the largest power of two not exceeding i16::MAX / max_activation.
const MAX_VALUE: i32 = 128;
pub const PRECISION: i32 = (i16::MAX as i32 + 1) / MAX_VALUE;
const SQUARE_PRECISION: i32 = PRECISION * PRECISION;

const NET_BYTES: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/pyrite.net"));

static MODEL: OnceCell<Model> = OnceCell::new();

/// Index of the one-hot input for `role` of `color` standing on `sq`.
pub fn feature_index(color: Color, role: Role, sq: Square) -> usize {
    let side = if color == Color::White { 0 } else { 1 };
    let kind = role as usize - 1; // Role::Pawn == 1
    (side * 6 + kind) * 64 + sq as usize
}

/// A make-move publishes at most four one-hot input flips: mover off + mover
/// on, plus optionally a captured piece off, plus the rook pair for castling.
#[derive(Clone, Debug, Default)]
pub struct DeltaArray {
    pub deltas: ArrayVec<(usize, i16), 4>,
}

impl DeltaArray {
    pub fn add(&mut self, index: usize) {
        self.deltas.push((index, 1));
    }

    pub fn remove(&mut self, index: usize) {
        self.deltas.push((index, -1));
    }
}

#[derive(Debug)]
pub enum NetworkError {
    Malformed(String),
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::Malformed(msg) => write!(f, "malformed network blob: {}", msg),
        }
    }
}

impl Error for NetworkError {}

struct InputLayer {
    weights: Vec<[i16; HIDDEN_1]>, // indexed [input][neuron]
    bias: [i16; HIDDEN_1],
}

struct HiddenLayer {
    weights: Vec<[i16; HIDDEN_1]>, // indexed [neuron][input]
    bias: [i32; HIDDEN_2],
}

struct OutputLayer {
    weights: [i32; HIDDEN_2],
    bias: i32,
}

pub struct Model {
    input: InputLayer,
    hidden: HiddenLayer,
    output: OutputLayer,
}

/// Parse and quantise the embedded weight blob. Idempotent; the first call
/// does the work.
pub fn init() -> Result<(), NetworkError> {
    if MODEL.get().is_some() {
        return Ok(());
    }
    let model = Model::parse(NET_BYTES)?;
    let _ = MODEL.set(model);
    Ok(())
}

fn model() -> &'static Model {
    MODEL.get().expect("network not initialised, call network::init() first")
}

impl Model {
    /// The blob is little-endian IEEE-754 f32s laid out per layer as weights
    /// row-major by input, then bias. Floats are rounded to fixed point here.
    fn parse(bytes: &[u8]) -> Result<Model, NetworkError> {
        let mut reader = Cursor::new(bytes);

        let mut input = InputLayer {
            weights: vec![[0i16; HIDDEN_1]; INPUT],
            bias: [0i16; HIDDEN_1],
        };
        let mut row = [0f32; HIDDEN_1];
        for i in 0..INPUT {
            read_row(&mut reader, &mut row)?;
            for j in 0..HIDDEN_1 {
                input.weights[i][j] = quantise(row[j]) as i16;
            }
        }
        read_row(&mut reader, &mut row)?;
        for j in 0..HIDDEN_1 {
            input.bias[j] = quantise(row[j]) as i16;
        }

        let mut hidden = HiddenLayer {
            weights: vec![[0i16; HIDDEN_1]; HIDDEN_2],
            bias: [0i32; HIDDEN_2],
        };
        let mut hrow = [0f32; HIDDEN_2];
        for i in 0..HIDDEN_1 {
            read_row(&mut reader, &mut hrow)?;
            for j in 0..HIDDEN_2 {
                hidden.weights[j][i] = quantise(hrow[j]) as i16;
            }
        }
        read_row(&mut reader, &mut hrow)?;
        for j in 0..HIDDEN_2 {
            hidden.bias[j] = quantise(hrow[j]);
        }

        let mut output = OutputLayer { weights: [0i32; HIDDEN_2], bias: 0 };
        read_row(&mut reader, &mut hrow)?;
        for j in 0..HIDDEN_2 {
            output.weights[j] = quantise(hrow[j]);
        }
        let mut last = [0f32; 1];
        read_row(&mut reader, &mut last)?;
        output.bias = quantise(last[0]);

        let mut rest = Vec::new();
        reader
            .read_to_end(&mut rest)
            .map_err(|e| NetworkError::Malformed(e.to_string()))?;
        if !rest.is_empty() {
            return Err(NetworkError::Malformed(format!(
                "{} trailing bytes after final layer",
                rest.len()
            )));
        }

        Ok(Model { input, hidden, output })
    }
}

fn read_row(reader: &mut Cursor<&[u8]>, row: &mut [f32]) -> Result<(), NetworkError> {
    reader
        .read_f32_into::<LittleEndian>(row)
        .map_err(|_| NetworkError::Malformed("blob truncated".to_string()))
}

fn quantise(v: f32) -> i32 {
    (v * PRECISION as f32).round() as i32
}

/// Stack of first-layer pre-activations, one entry per move on the current
/// line. The top always equals what a full recompute from the position would
/// produce.
#[derive(Clone)]
pub struct Accumulator {
    stack: Vec<[i16; HIDDEN_1]>,
}

impl Accumulator {
    pub fn from_active_features(active: &[usize]) -> Self {
        let mut acc = Accumulator { stack: Vec::with_capacity(64) };
        acc.recalculate(active);
        acc
    }

    /// Reset the stack to a single entry computed from scratch.
    pub fn recalculate(&mut self, active: &[usize]) {
        let m = model();
        let mut zeta = m.input.bias;
        for &index in active {
            let weights = &m.input.weights[index];
            for j in 0..HIDDEN_1 {
                zeta[j] += weights[j];
            }
        }
        self.stack.clear();
        self.stack.push(zeta);
    }

    /// Duplicate the top and add/subtract the weight rows of the flipped
    /// inputs.
    pub fn apply_delta(&mut self, update: &DeltaArray) {
        let m = model();
        let top = *self.stack.last().expect("accumulator stack is never empty");
        self.stack.push(top);
        let zeta = self.stack.last_mut().expect("accumulator stack is never empty");
        for &(index, delta) in &update.deltas {
            let weights = &m.input.weights[index];
            if delta == 1 {
                for j in 0..HIDDEN_1 {
                    zeta[j] += weights[j];
                }
            } else {
                for j in 0..HIDDEN_1 {
                    zeta[j] -= weights[j];
                }
            }
        }
    }

    pub fn apply_inverse_delta(&mut self) {
        self.stack.pop();
        debug_assert!(!self.stack.is_empty(), "popped the base accumulator");
    }

    /// A null move leaves the board untouched; push a copy to stay in
    /// lock-step with make/unmake.
    pub fn push_duplicate(&mut self) {
        let top = *self.stack.last().expect("accumulator stack is never empty");
        self.stack.push(top);
    }

    pub fn top(&self) -> &[i16; HIDDEN_1] {
        self.stack.last().expect("accumulator stack is never empty")
    }

    /// Feed the clipped first-layer activations through the rest of the net.
    /// Returns centipawns from White's perspective.
    pub fn evaluate(&self) -> Score {
        let m = model();
        let top = self.top();

        let mut activation = [0i16; HIDDEN_1];
        for j in 0..HIDDEN_1 {
            activation[j] = top[j].max(0);
        }

        let mut hidden_out = [0i32; HIDDEN_2];
        for j in 0..HIDDEN_2 {
            let weights = &m.hidden.weights[j];
            let mut sum: i32 = 0;
            for i in 0..HIDDEN_1 {
                sum += activation[i] as i32 * weights[i] as i32;
            }
            sum /= PRECISION;
            sum += m.hidden.bias[j];
            hidden_out[j] = sum.max(0);
        }

        let mut zeta: i32 = m.output.bias * PRECISION;
        for j in 0..HIDDEN_2 {
            zeta += hidden_out[j] * m.output.weights[j];
        }

        zeta / SQUARE_PRECISION
    }
}


// The first layer is the accumulator: make pushes a copy of the top and
// applies at most four weight-row updates, unmake pops. Only null moves and
// root resets recompute from scratch. Weights are f32 in the blob and are
// rounded to fixed point (scale 256) at load, so first-layer sums stay in
// i16 and the output collapses back to centipawns after two divisions.
