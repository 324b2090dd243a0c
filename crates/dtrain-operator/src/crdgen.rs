use kube::CustomResourceExt;

use dtrain_operator::crd::TrainingJob;

fn main() {
    let yaml = serde_yaml::to_string(&TrainingJob::crd()).unwrap();
    std::fs::write("training_job_crd.yaml", yaml).unwrap();
}
