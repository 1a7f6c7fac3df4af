use kube::CustomResourceExt;
use kube::core::crd::merge_crds;

use crate::crd::v1::duck_type::DuckType;


/// Generate the CRDs for the operator. Only DuckType is served from a fixed
/// schema; the per-family duck CRDs are derived at runtime by the DuckType
/// controller.
pub fn generate_crds() {
    for crd in vec![
        merge_crds(vec![DuckType::crd()], "v1").expect("failed to merge DuckType CRDs"),
    ] {
        println!("---");
        println!("{}", serde_norway::to_string(&crd).unwrap());
    }
}
