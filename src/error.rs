use crate::deps::thiserror;



#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("an io error occurred: {source}")]
    IO {
        #[from]
        source: std::io::Error,
        #[cfg(feature = "nightly")]
        backtrace: std::backtrace::Backtrace,
    },

    #[error("parsing {typename} from {value:?}, reason: {reason:}")]
    Parse {
        value:    String,
        typename: &'static str,
        reason:   String,
    },

    #[error("configuration error at {path}: {reason}")]
    Config {
        path:   String,
        reason: String,
    },

    #[error("placement refused by protocol {protocol:?}: width={width}, type={operand}")]
    PlacementRefused {
        protocol: &'static str,
        width:    u64,
        operand:  &'static str,
    },

    #[error("paging infeasible at instruction {instruction}: working set exceeds {num_frames} page frames")]
    PagingInfeasible {
        instruction: u64,
        num_frames:  u64,
    },

    #[error("swap transfer failed on page frame {ppn:#x}: {reason}")]
    Swap {
        ppn:    u64,
        reason: String,
    },

    #[error("protocol backend failed: {reason}")]
    Protocol {
        reason: String,
    },

    #[error("could not establish worker mesh: {reason}")]
    Mesh {
        reason: String,
    },
}
