use async_trait::async_trait;
use floors::{BlockDescriptor, BlockType, FloorError, Payload};

/// The remote side of a page: page configs and per-block data.
///
/// Transport is up to the implementor. Failures should be reported as `Network` or `DataParse`
/// errors so the manager's retry and fallback strategies apply.
#[async_trait]
pub trait RemoteDataSource: Send + Sync {
    /// The ordered block list for `page_id`, or `None` if the page doesn't exist.
    async fn load_page_config(
        &self,
        page_id: &str,
    ) -> Result<Option<Vec<BlockDescriptor>>, FloorError>;

    /// Data for one block. `params` is the descriptor's embedded payload.
    ///
    /// `None` means the source has nothing beyond the embedded payload, which is then used as the
    /// block's data.
    async fn load_block_payload(
        &self,
        block_id: &str,
        block_type: BlockType,
        params: &Payload,
    ) -> Result<Option<Payload>, FloorError>;

    async fn update_page_config(
        &self,
        page_id: &str,
        descriptors: &[BlockDescriptor],
    ) -> Result<bool, FloorError>;
}

/// A source with no remote: every block uses its embedded payload and there are no pages.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmbeddedSource;

#[async_trait]
impl RemoteDataSource for EmbeddedSource {
    async fn load_page_config(
        &self,
        _page_id: &str,
    ) -> Result<Option<Vec<BlockDescriptor>>, FloorError> {
        Ok(None)
    }

    async fn load_block_payload(
        &self,
        _block_id: &str,
        _block_type: BlockType,
        _params: &Payload,
    ) -> Result<Option<Payload>, FloorError> {
        Ok(None)
    }

    async fn update_page_config(
        &self,
        _page_id: &str,
        _descriptors: &[BlockDescriptor],
    ) -> Result<bool, FloorError> {
        Ok(false)
    }
}
