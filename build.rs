use std::env;
use std::fs::File;
use std::io::{BufWriter, Result, Write};
use std::path::Path;

// Network shape mirrored in src/network.rs. The blob is a flat sequence of
// little-endian f32s: for each layer, weights row-major by input, then bias.
const INPUT: usize = 768;
const HIDDEN_1: usize = 256;
const HIDDEN_2: usize = 32;

const MATERIAL: [f32; 6] = [1.0, 3.1, 3.3, 5.0, 9.75, 0.0]; // P N B R Q K, in pawns
const OUTPUT_SCALE: f32 = 100.0; // pawns -> centipawns

fn main() -> Result<()> {
    let out_dir = env::var("OUT_DIR").expect("OUT_DIR not set");
    let path = Path::new(&out_dir).join("pyrite.net");
    let mut w = BufWriter::new(File::create(&path)?);

    write_input_layer(&mut w)?;
    write_hidden_layer(&mut w)?;
    write_output_layer(&mut w)?;

    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}

fn put(w: &mut impl Write, v: f32) -> Result<()> {
    w.write_all(&v.to_le_bytes())
}

/// 768 -> 256. Neuron 0 sums White material, neuron 1 sums Black material.
/// The remaining neurons carry small deterministic weights so that the
/// incremental accumulator path is exercised on every feature; they are not
/// connected to the output.
fn write_input_layer(w: &mut impl Write) -> Result<()> {
    for input in 0..INPUT {
        let piece = input / 64; // 0-5 white P..K, 6-11 black P..K
        let white = piece < 6;
        let value = MATERIAL[piece % 6];
        for neuron in 0..HIDDEN_1 {
            let weight = match neuron {
                0 if white => value,
                1 if !white => value,
                0 | 1 => 0.0,
                _ => jitter(input, neuron),
            };
            put(w, weight)?;
        }
    }
    for _ in 0..HIDDEN_1 {
        put(w, 0.0)?; // bias
    }
    Ok(())
}

/// 256 -> 32. Neurons 0 and 1 compute the two signs of the material balance;
/// ReLU keeps exactly one of them alive.
fn write_hidden_layer(w: &mut impl Write) -> Result<()> {
    for input in 0..HIDDEN_1 {
        for neuron in 0..HIDDEN_2 {
            let weight = match (input, neuron) {
                (0, 0) | (1, 1) => 1.0,
                (0, 1) | (1, 0) => -1.0,
                _ => 0.0,
            };
            put(w, weight)?;
        }
    }
    for _ in 0..HIDDEN_2 {
        put(w, 0.0)?;
    }
    Ok(())
}

/// 32 -> 1, rescaling the surviving balance to centipawns.
fn write_output_layer(w: &mut impl Write) -> Result<()> {
    for input in 0..HIDDEN_2 {
        let weight = match input {
            0 => OUTPUT_SCALE,
            1 => -OUTPUT_SCALE,
            _ => 0.0,
        };
        put(w, weight)?;
    }
    put(w, 0.0) // bias
}

/// Deterministic pseudo-random weight in roughly [-0.05, 0.05].
fn jitter(input: usize, neuron: usize) -> f32 {
    let mut x = (input as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ (neuron as u64);
    x ^= x >> 30;
    x = x.wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x ^= x >> 27;
    ((x & 0xFFFF) as f32 / 65535.0 - 0.5) * 0.1
}
