use shadow_rs::ShadowBuilder;

fn main() {
    // Build metadata backs the `--version` output of the mfw-queue binary
    ShadowBuilder::builder()
        .build()
        .expect("Failed to generate build metadata");
}
