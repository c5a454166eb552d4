pub mod tests {
    use crate::{FunctionPatch, FunctionRecord, FunctionRecordBuilder};

    pub const TEST_IMAGE: &str = "fnproject/fn-test-utils";
    pub const TEST_VERSION: &str = "0.0.1";

    pub fn mock_patch() -> FunctionPatch {
        mock_patch_with_image(TEST_IMAGE)
    }

    pub fn mock_patch_with_image(image: &str) -> FunctionPatch {
        FunctionPatch {
            image: Some(image.to_string()),
            version: Some(TEST_VERSION.to_string()),
            ..Default::default()
        }
    }

    pub fn mock_function(name: &str) -> FunctionRecord {
        FunctionRecordBuilder::default()
            .id(format!("id-{name}"))
            .name(name.to_string())
            .image(TEST_IMAGE.to_string())
            .version(TEST_VERSION.to_string())
            .created_at(1)
            .updated_at(1)
            .build()
            .unwrap()
    }
}
