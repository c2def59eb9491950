//! Merkle CLI Tool
//!
//! Builds hash trees over ordered step digests, generates inclusion proofs,
//! and verifies proofs independently of any running service.

use provenance_core::{verify_proof, Digest, HashTree, MerkleProof};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::process;

/// Serializable tree info for CLI
#[derive(Debug, Serialize, Deserialize)]
struct TreeInfo {
    root_hash: Digest,
    leaf_count: usize,
    leaves: Vec<Digest>,
}

/// JSON output for build command
#[derive(Debug, Serialize)]
struct BuildOutput {
    root_hash: Digest,
    leaf_count: usize,
    success: bool,
}

/// JSON output for prove command
#[derive(Debug, Serialize)]
struct ProveOutput {
    leaf_hash: Digest,
    leaf_index: usize,
    root_hash: Digest,
    sibling_count: usize,
    success: bool,
}

/// Proof file written by `prove` and read by `verify`
#[derive(Debug, Serialize, Deserialize)]
struct ProofFile {
    root_hash: Digest,
    proof: MerkleProof,
}

/// JSON output for verify command
#[derive(Debug, Serialize)]
struct VerifyOutput {
    valid: bool,
    leaf_hash: Digest,
    root_hash: Digest,
    message: String,
}

/// Reads one hex digest per line, in order. Blank lines and `#` comments are skipped.
fn read_digests_from_file(path: &PathBuf) -> Result<Vec<Digest>, String> {
    let file = fs::File::open(path).map_err(|e| format!("Failed to read input: {}", e))?;
    let reader = io::BufReader::new(file);
    let mut digests = Vec::new();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| format!("Failed to read input: {}", e))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let digest = Digest::from_hex(line)
            .map_err(|e| format!("Line {}: {}", line_no + 1, e))?;
        digests.push(digest);
    }

    Ok(digests)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|e| format!("Failed to render output: {}", e))?;
    println!("{}", rendered);
    Ok(())
}

fn cmd_build(input: PathBuf, output: Option<PathBuf>, json: bool) -> Result<(), String> {
    let leaves = read_digests_from_file(&input)?;
    let tree = HashTree::build(leaves);

    if json {
        print_json(&BuildOutput {
            root_hash: tree.root(),
            leaf_count: tree.leaf_count(),
            success: true,
        })?;
    } else {
        println!("Root hash: {}", tree.root());
        println!("Leaf count: {}", tree.leaf_count());
    }

    if let Some(output_path) = output {
        let tree_info = TreeInfo {
            root_hash: tree.root(),
            leaf_count: tree.leaf_count(),
            leaves: tree.leaves().to_vec(),
        };
        let json_str = serde_json::to_string_pretty(&tree_info)
            .map_err(|e| format!("Failed to serialize tree: {}", e))?;
        fs::write(&output_path, json_str).map_err(|e| format!("Failed to write output: {}", e))?;

        if !json {
            println!("Tree saved to: {}", output_path.display());
        }
    }

    Ok(())
}

fn cmd_prove(
    tree_path: PathBuf,
    leaf_index: usize,
    output: Option<PathBuf>,
    json: bool,
) -> Result<(), String> {
    let tree_json =
        fs::read_to_string(&tree_path).map_err(|e| format!("Failed to read tree file: {}", e))?;
    let tree_info: TreeInfo = serde_json::from_str(&tree_json)
        .map_err(|e| format!("Failed to parse tree file: {}", e))?;

    let tree = HashTree::build(tree_info.leaves);
    if tree.root() != tree_info.root_hash {
        return Err(format!(
            "Tree file root {} does not match rebuilt root {}",
            tree_info.root_hash,
            tree.root()
        ));
    }

    let proof = tree
        .get_proof(leaf_index)
        .map_err(|e| format!("Failed to generate proof: {}", e))?;

    if json {
        print_json(&ProveOutput {
            leaf_hash: proof.leaf,
            leaf_index: proof.leaf_index,
            root_hash: tree.root(),
            sibling_count: proof.steps.len(),
            success: true,
        })?;
    } else {
        println!("Proof generated for leaf {}", leaf_index);
        println!("Leaf hash: {}", proof.leaf);
        println!("Root hash: {}", tree.root());
        println!("Sibling count: {}", proof.steps.len());
    }

    if let Some(output_path) = output {
        let proof_file = ProofFile {
            root_hash: tree.root(),
            proof,
        };
        let json_str = serde_json::to_string_pretty(&proof_file)
            .map_err(|e| format!("Failed to serialize proof: {}", e))?;
        fs::write(&output_path, json_str).map_err(|e| format!("Failed to write proof: {}", e))?;

        if !json {
            println!("Proof saved to: {}", output_path.display());
        }
    }

    Ok(())
}

fn cmd_verify(proof_path: PathBuf, json: bool) -> Result<(), String> {
    let proof_json =
        fs::read_to_string(&proof_path).map_err(|e| format!("Failed to read proof file: {}", e))?;
    let proof_file: ProofFile = serde_json::from_str(&proof_json)
        .map_err(|e| format!("Failed to parse proof file: {}", e))?;

    let proof = &proof_file.proof;
    let valid = verify_proof(&proof.leaf, &proof.steps, &proof_file.root_hash);

    if json {
        print_json(&VerifyOutput {
            valid,
            leaf_hash: proof.leaf,
            root_hash: proof_file.root_hash,
            message: if valid { "Proof is valid" } else { "Proof is invalid" }.to_string(),
        })?;
    } else if valid {
        println!("✓ Proof is VALID");
        println!("  Leaf: {}", proof.leaf);
        println!("  Root: {}", proof_file.root_hash);
    } else {
        println!("✗ Proof is INVALID");
    }

    if valid {
        Ok(())
    } else {
        Err("Proof verification failed".to_string())
    }
}

fn parse_args() -> Result<(String, Vec<String>), String> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        return Err("Usage: merkle-cli <command> [options]".to_string());
    }

    Ok((args[1].clone(), args[2..].to_vec()))
}

/// Returns the value following `flag` (or its short form), if present.
fn flag_value(args: &[String], long: &str, short: &str) -> Option<String> {
    args.iter()
        .position(|a| a == long || a == short)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn print_usage() {
    println!("Merkle CLI - Build and verify execution hash trees");
    println!();
    println!("USAGE:");
    println!("    merkle-cli build --input <file> [--output <file>] [--json]");
    println!("    merkle-cli prove --tree <file> --leaf-index <n> [--output <file>] [--json]");
    println!("    merkle-cli verify --proof <file> [--json]");
    println!();
    println!("COMMANDS:");
    println!("    build     Build a tree from step hashes (one hex digest per line, in order)");
    println!("    prove     Generate a proof for a specific leaf");
    println!("    verify    Verify an inclusion proof");
    println!();
    println!("EXAMPLES:");
    println!("    merkle-cli build --input step_hashes.txt --output tree.json");
    println!("    merkle-cli prove --tree tree.json --leaf-index 3 --output proof.json");
    println!("    merkle-cli verify --proof proof.json");
}

fn main() {
    let (command, args) = match parse_args() {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("Error: {}", e);
            println!();
            print_usage();
            process::exit(1);
        }
    };
    let json = args.iter().any(|a| a == "--json");
    let output = flag_value(&args, "--output", "-o").map(PathBuf::from);

    let result = match command.as_str() {
        "build" => match flag_value(&args, "--input", "-i") {
            Some(input) => cmd_build(PathBuf::from(input), output, json),
            None => Err("Missing --input argument".to_string()),
        },
        "prove" => {
            let tree = flag_value(&args, "--tree", "-t");
            let leaf_index = flag_value(&args, "--leaf-index", "-l").and_then(|v| v.parse().ok());
            match (tree, leaf_index) {
                (Some(tree), Some(idx)) => cmd_prove(PathBuf::from(tree), idx, output, json),
                (None, _) => Err("Missing --tree argument".to_string()),
                (_, None) => Err("Missing or invalid --leaf-index argument".to_string()),
            }
        }
        "verify" => match flag_value(&args, "--proof", "-p") {
            Some(proof) => cmd_verify(PathBuf::from(proof), json),
            None => Err("Missing --proof argument".to_string()),
        },
        _ => {
            print_usage();
            Err(format!("Unknown command: {}", command))
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
