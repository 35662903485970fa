//! Archive container formats, detected from the file name.

use bzip2::read::BzDecoder;
use derive_more::Display;
use flate2::read::GzDecoder;
use std::io::Read;
use xz2::read::XzDecoder;

/// A supported archive container.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
pub enum ArchiveFormat {
    /// ZIP (.zip)
    #[display("zip")]
    Zip,
    /// Uncompressed tarball (.tar)
    #[display("tar")]
    Tar,
    /// Gzip-compressed tarball (.tar.gz, .tgz)
    #[display("tar.gz")]
    TarGzip,
    /// Bzip2-compressed tarball (.tar.bz2, .tbz2, .tbz)
    #[display("tar.bz2")]
    TarBzip2,
    /// XZ-compressed tarball (.tar.xz, .txz)
    #[display("tar.xz")]
    TarXz,
}

const EXTENSIONS: &[(&str, ArchiveFormat)] = &[
    (".tar.gz", ArchiveFormat::TarGzip),
    (".tar.bz2", ArchiveFormat::TarBzip2),
    (".tar.xz", ArchiveFormat::TarXz),
    (".tgz", ArchiveFormat::TarGzip),
    (".tbz2", ArchiveFormat::TarBzip2),
    (".tbz", ArchiveFormat::TarBzip2),
    (".txz", ArchiveFormat::TarXz),
    (".tar", ArchiveFormat::Tar),
    (".zip", ArchiveFormat::Zip),
];

impl ArchiveFormat {
    /// Detect the format from a file name or path (case-insensitive).
    ///
    /// # Examples
    ///
    /// ```
    /// use duopane_storage::backend::archive::ArchiveFormat;
    ///
    /// assert_eq!(ArchiveFormat::from_name("backup.TAR.GZ"), Some(ArchiveFormat::TarGzip));
    /// assert_eq!(ArchiveFormat::from_name("photos.zip"), Some(ArchiveFormat::Zip));
    /// assert_eq!(ArchiveFormat::from_name("notes.txt"), None);
    /// ```
    pub fn from_name(name: &str) -> Option<Self> {
        Self::lookup(name).map(|(_, format)| format)
    }

    /// The matched extension, including the leading dot.
    pub fn extension_of(name: &str) -> Option<&'static str> {
        Self::lookup(name).map(|(extension, _)| extension)
    }

    fn lookup(name: &str) -> Option<(&'static str, Self)> {
        let lower = name.to_ascii_lowercase();
        EXTENSIONS.iter().find(|(extension, _)| lower.ends_with(extension)).copied()
    }

    pub fn is_tar(&self) -> bool {
        !matches!(self, Self::Zip)
    }

    /// Wrap a reader of the raw container with the matching decompressor.
    /// Only meaningful for tar variants; ZIP handles compression per member.
    pub(crate) fn decompressor<'a, R: Read + 'a>(&self, reader: R) -> Box<dyn Read + 'a> {
        match self {
            Self::Zip | Self::Tar => Box::new(reader),
            Self::TarGzip => Box::new(GzDecoder::new(reader)),
            Self::TarBzip2 => Box::new(BzDecoder::new(reader)),
            Self::TarXz => Box::new(XzDecoder::new(reader)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("a.zip", Some(ArchiveFormat::Zip))]
    #[case("a.tar", Some(ArchiveFormat::Tar))]
    #[case("a.tar.gz", Some(ArchiveFormat::TarGzip))]
    #[case("a.tgz", Some(ArchiveFormat::TarGzip))]
    #[case("a.tar.bz2", Some(ArchiveFormat::TarBzip2))]
    #[case("a.tbz2", Some(ArchiveFormat::TarBzip2))]
    #[case("a.tbz", Some(ArchiveFormat::TarBzip2))]
    #[case("a.tar.xz", Some(ArchiveFormat::TarXz))]
    #[case("/dir/A.TXZ", Some(ArchiveFormat::TarXz))]
    #[case("a.gz", None)]
    #[case("a.zipx", None)]
    #[case("tar", None)]
    fn test_from_name(#[case] name: &str, #[case] expected: Option<ArchiveFormat>) {
        assert_eq!(ArchiveFormat::from_name(name), expected);
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(ArchiveFormat::extension_of("x.tar.gz"), Some(".tar.gz"));
        assert_eq!(ArchiveFormat::extension_of("x.txt"), None);
    }
}
