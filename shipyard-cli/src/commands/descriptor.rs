//! Descriptor command
//!
//! Renders a deployment descriptor locally, byte-for-byte as the Build stage
//! would write it.

use anyhow::{Context, Result};
use shipyard_core::domain::descriptor;

pub fn print_descriptor(container: &str, image: &str) -> Result<()> {
    println!("{}", render(container, image)?);
    Ok(())
}

fn render(container: &str, image: &str) -> Result<String> {
    let descriptor =
        descriptor::build(container, image).context("Failed to build deployment descriptor")?;
    Ok(descriptor.to_wire())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_wire_format() {
        assert_eq!(
            render("tegolaServiceWeb", "eniro/tegola:latest").unwrap(),
            r#"[{"name":"tegolaServiceWeb","imageUri":"eniro/tegola:latest"}]"#
        );
    }

    #[test]
    fn test_render_rejects_empty_input() {
        assert!(render("", "eniro/tegola:latest").is_err());
    }
}
