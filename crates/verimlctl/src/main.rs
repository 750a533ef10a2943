// Copyright (c) 2026 VeriML Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use veriml_verifier::{parse_signer_address, ProofBundle};

#[derive(Parser)]
#[command(name = "verimlctl")]
#[command(about = "Verify veriml prediction attestations offline")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Verify a proof against a trusted signer address.
    Verify {
        #[arg(long)]
        model_hash: String,
        #[arg(long)]
        input_hash: String,
        #[arg(long)]
        output_hash: String,
        #[arg(long)]
        signature: String,
        /// Trusted 20-byte signer address (hex, 0x prefix optional).
        #[arg(long)]
        signer: String,
        /// Optional file holding the prediction JSON; when given, its
        /// digest must match the attested output hash.
        #[arg(long)]
        prediction_file: Option<PathBuf>,
    },
    /// Recover and print the signer address from a proof.
    Recover {
        #[arg(long)]
        model_hash: String,
        #[arg(long)]
        input_hash: String,
        #[arg(long)]
        output_hash: String,
        #[arg(long)]
        signature: String,
    },
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("INVALID: {err}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.cmd {
        Command::Verify {
            model_hash,
            input_hash,
            output_hash,
            signature,
            signer,
            prediction_file,
        } => {
            let bundle = ProofBundle::from_hex(&model_hash, &input_hash, &output_hash, &signature)?;
            if let Some(path) = prediction_file {
                let prediction = std::fs::read(&path)?;
                bundle.check_output_binding(prediction.trim_ascii())?;
            }
            let expected = parse_signer_address(&signer)?;
            let recovered = bundle.verify(&expected)?;
            println!("VALID: signed by 0x{}", hex::encode(recovered));
            Ok(())
        }
        Command::Recover {
            model_hash,
            input_hash,
            output_hash,
            signature,
        } => {
            let bundle = ProofBundle::from_hex(&model_hash, &input_hash, &output_hash, &signature)?;
            let recovered = bundle.recover_signer()?;
            println!("0x{}", hex::encode(recovered));
            Ok(())
        }
    }
}
