//! Inspect one pooling step
//!
//! Runs an untrained two-stage encoder over a barbell graph and prints the
//! soft assignment of the last stage, the coarsened adjacencies and the
//! structural loss terms. Saves and reloads a checkpoint along the way.
//!
//! Run with:
//! ```bash
//! cargo run --example pool_inspect
//! ```

use diffpool::prelude::*;

fn barbell(device: &Device) -> Result<GraphBatch> {
    // Two triangles {0,1,2} and {3,4,5} joined by the edge 2-3, padded to 8
    let n = 8;
    let edges = [(0, 1), (0, 2), (1, 2), (2, 3), (3, 4), (3, 5), (4, 5)];
    let mut adj = vec![0.0f32; n * n];
    for (i, j) in edges {
        adj[i * n + j] = 1.0;
        adj[j * n + i] = 1.0;
    }
    let mut x = vec![0.0f32; n * 2];
    for i in 0..6 {
        x[i * 2] = 1.0;
        x[i * 2 + 1] = i as f32 / 5.0;
    }

    Ok(GraphBatch::new(
        Tensor::from_vec(x, (1, n, 2), device)?,
        Tensor::from_vec(adj, (1, n, n), device)?,
    )
    .with_node_counts(vec![6]))
}

fn print_matrix(name: &str, t: &Tensor) -> Result<()> {
    println!("{} {:?}", name, t.dims());
    for row in t.squeeze(0)?.to_vec2::<f32>()? {
        let cells: Vec<String> = row.iter().map(|v| format!("{:6.3}", v)).collect();
        println!("  [{}]", cells.join(" "));
    }
    Ok(())
}

fn main() -> Result<()> {
    let device = cpu_device();
    let config = EncoderConfig::new(8, 2, 2)
        .with_dims(8, 8)
        .with_pooling(2, 0.5)
        .with_entropy_weight(1.0);
    let encoder = HierarchicalEncoder::new(config, &mut XavierUniform::relu(3), &device)?;

    let batch = barbell(&device)?;
    let output = encoder.forward(&batch)?;

    for (level, adj) in output.adjacencies.iter().enumerate() {
        print_matrix(&format!("level {} adjacency", level + 1), adj)?;
    }
    if let (Some(s), Some(level)) = (&output.assignment, output.assign_level) {
        print_matrix(&format!("assignment out of level {}", level), s)?;
    }

    let loss = encoder.loss(&output, &Tensor::new(&[1u32], &device)?, batch.node_counts())?;
    println!(
        "loss: total {:.4}, ce {:.4}, link {:?}, entropy {:?}",
        loss.total_value()?,
        loss.primary_value()?,
        loss.link_value()?,
        loss.entropy_value()?
    );
    for warning in &loss.warnings {
        println!("warning: {}", warning);
    }

    let path = std::env::temp_dir().join("diffpool_pool_inspect.safetensors");
    let meta = save_checkpoint(&encoder, &path)?;
    let restored = diffpool::checkpoint::load_encoder(&path, &device)?;
    let again = restored.forward(&batch)?;
    println!(
        "checkpoint {} (hash {}…): scores match = {}",
        path.display(),
        &meta.config_hash[..12],
        output.scores.to_vec2::<f32>()? == again.scores.to_vec2::<f32>()?
    );
    Ok(())
}
