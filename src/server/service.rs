use std::collections::HashMap;
use tonic::metadata::{Ascii, MetadataKey, MetadataMap, MetadataValue};
use tonic::{Code, Request, Response, Status, Streaming};

use crate::registry::Instances;
use crate::rpc::grpc::plugin_service_server::PluginService;
use crate::rpc::{ClientEventMessage, Empty, PluginInstances};
use crate::server::reactor::{EventStream, EventStreamReactor};

/// The RPC surface over the instance table. Sessions authenticate with nothing more than the
/// instance id they were told out of band (or learned from the discovery metadata).
pub(crate) struct ClapPluginService;

/// The live instances as metadata entries, one `<kind id> = <instance id>` pair each. Kind ids
/// are reverse-domain names, which are valid (lowercase) metadata keys; anything that somehow
/// isn't is skipped.
fn instances_as_metadata() -> MetadataMap {
    let mut metadata = MetadataMap::new();
    for (kind_id, instance_id) in Instances::snapshot() {
        let key = match MetadataKey::<Ascii>::from_bytes(kind_id.as_bytes()) {
            Ok(key) => key,
            Err(_) => {
                remote_debug_assert_failure!("Kind id '{}' is not a valid metadata key", kind_id);
                continue;
            }
        };
        let value = match instance_id.to_string().parse::<MetadataValue<Ascii>>() {
            Ok(value) => value,
            Err(_) => continue,
        };
        metadata.insert(key, value);
    }

    metadata
}

#[tonic::async_trait]
impl PluginService for ClapPluginService {
    type EventStreamStream = EventStream;

    async fn event_stream(
        &self,
        request: Request<Streaming<ClientEventMessage>>,
    ) -> Result<Response<Self::EventStreamStream>, Status> {
        // The client must provide the id of the instance it wants to attach to
        let plugin_id = request
            .metadata()
            .get("plugin_id")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok());

        let Some(plugin_id) = plugin_id else {
            // Help discovery clients along: the rejection carries the kind to instance mapping
            return Err(Status::with_metadata(
                Code::Unauthenticated,
                "no plugin_id in request metadata",
                instances_as_metadata(),
            ));
        };

        match Instances::shared(plugin_id) {
            Some(shared) => {
                remote_trace!("New event stream session against instance {plugin_id}");
                Ok(Response::new(EventStreamReactor::connect(
                    shared,
                    request.into_inner(),
                )))
            }
            None => Err(Status::unauthenticated(format!(
                "unknown plugin instance {plugin_id}"
            ))),
        }
    }

    async fn get_plugin_instances(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<PluginInstances>, Status> {
        let mut instances = HashMap::new();
        for (kind_id, instance_id) in Instances::snapshot() {
            if instances.insert(kind_id.to_owned(), instance_id).is_some() {
                return Err(Status::resource_exhausted(format!(
                    "multiple live instances of kind '{kind_id}' do not fit the response map"
                )));
            }
        }

        Ok(Response::new(PluginInstances { instances }))
    }
}
