//! Build script for clone-fs that emits git metadata via vergen.

/// Emit the git SHA so `clone-fs --version` can report the exact build.
///
/// `GIT_SHA` wins when set (release builds outside a checkout). Otherwise vergen-gitcl asks the
/// local `.git` directory, and falls back to a placeholder when there is none.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Ok(sha) = std::env::var("GIT_SHA") {
        println!("cargo:rustc-env=VERGEN_GIT_SHA={sha}");
    } else {
        use vergen_gitcl::{Emitter, GitclBuilder};
        let gitcl = GitclBuilder::default().sha(true).build()?;
        Emitter::default().add_instructions(&gitcl)?.emit()?;
    }

    Ok(())
}
