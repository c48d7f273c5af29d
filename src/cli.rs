use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "zipmend")]
#[command(version)]
#[command(about = "Structural editor for ZIP/JAR archives", long_about = None)]
#[command(after_help = "Examples:\n  \
  zipmend list -v app.jar                       list entries with sizes and dates\n  \
  zipmend digest app.jar META-INF/MANIFEST.MF   SHA-256 of a decompressed entry\n  \
  zipmend delete app.jar 'META-INF/SIG.RSA' --patch sig.patch\n  \
  zipmend add app.jar sig.rsa --name META-INF/SIG.RSA --store -o signed.jar\n  \
  zipmend apply sig.patch app.jar               apply a patch in place")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List entries in the archive
    List {
        /// Archive path
        archive: PathBuf,

        /// List verbosely (sizes, method, timestamps)
        #[arg(short = 'v')]
        verbose: bool,
    },

    /// Print the SHA-256 digest of an entry's decompressed content
    Digest {
        /// Archive path
        archive: PathBuf,

        /// Entry name
        entry: String,
    },

    /// Delete entries, emitting a patch or a rewritten archive
    Delete {
        /// Archive path
        archive: PathBuf,

        /// Entry names to delete
        #[arg(required = true)]
        names: Vec<String>,

        /// Write the binary patch here instead of applying it
        #[arg(long, value_name = "FILE")]
        patch: Option<PathBuf>,

        /// Write the patched archive here (defaults to in-place)
        #[arg(short = 'o', long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Insert a file as a new entry
    Add {
        /// Archive path
        archive: PathBuf,

        /// File whose contents become the new entry
        file: PathBuf,

        /// Entry name inside the archive (defaults to the file name)
        #[arg(long, value_name = "NAME")]
        name: Option<String>,

        /// Store the entry uncompressed instead of deflating it
        #[arg(long)]
        store: bool,

        /// Write the binary patch here instead of applying it
        #[arg(long, value_name = "FILE")]
        patch: Option<PathBuf>,

        /// Write the patched archive here (defaults to in-place)
        #[arg(short = 'o', long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Apply a serialized binary patch to a file
    Apply {
        /// Patch file
        patch: PathBuf,

        /// File the patch was generated against
        target: PathBuf,

        /// Destination (defaults to patching the target in place)
        #[arg(short = 'o', long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}
