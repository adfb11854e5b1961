//! Print the Certificate CRD as YAML
//!
//! ```bash
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use anyhow::Result;
use certificate_controller::Certificate;
use kube::CustomResourceExt;

fn main() -> Result<()> {
    let crd = serde_yaml::to_string(&Certificate::crd())
        .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
    print!("{crd}");
    Ok(())
}
