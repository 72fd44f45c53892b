use super::Client;
use crate::proto::etcdserverpb::Member;
use crate::proto::etcdserverpb::MemberListRequest;
use crate::Result;

impl Client {
    /// Lists all cluster members
    ///
    /// The answer is linearizable, so a member that was just added or removed
    /// is reflected.
    pub async fn member_list(&self) -> Result<Vec<Member>> {
        let response = self
            .kv()
            .member_list(MemberListRequest { linearizable: true })
            .await?;
        Ok(response.members)
    }
}
