use crate::engine::Engine;
use crate::lifecycle::CreationPhase;
use crate::rollback::Rollback;
use crate::CoreError;
use berth_runtime::{Instance, InstanceIdentity, InstanceStorage};
use berth_schema::ContainerArgs;
use berth_store::{RollbackStep, WalOpKind};
use tracing::{debug, info};

fn volume_step(inst: &Instance) -> RollbackStep {
    RollbackStep::DeleteVolume {
        pool: inst.pool().to_owned(),
        name: inst.name().to_owned(),
    }
}

impl Engine {
    /// Create a container with an empty root volume.
    pub fn create_as_empty(&self, args: ContainerArgs) -> Result<Instance, CoreError> {
        info!("creating empty container '{}'", args.name);
        let mut rb = Rollback::begin(self, WalOpKind::CreateEmpty, &args.name)?;
        let inst = self.create_internal(&mut rb, args)?;
        rb.advance(CreationPhase::Reserved)?;

        self.driver(inst.pool())?.create_empty(&inst)?;
        rb.push(volume_step(&inst))?;
        rb.advance(CreationPhase::Materialized)?;

        self.configure(&inst)?;
        rb.advance(CreationPhase::Configured)?;
        rb.commit()?;
        info!("created '{}' on pool '{}'", inst.name(), inst.pool());
        Ok(inst)
    }

    /// Register a snapshot with an empty volume, to be filled by a migration
    /// or import.
    pub fn create_empty_snapshot(&self, args: ContainerArgs) -> Result<Instance, CoreError> {
        info!("creating empty snapshot '{}'", args.name);
        let mut rb = Rollback::begin(self, WalOpKind::CreateEmptySnapshot, &args.name)?;
        let inst = self.create_internal(&mut rb, args)?;
        rb.advance(CreationPhase::Reserved)?;

        self.driver(inst.pool())?.snapshot_create_empty(&inst)?;
        rb.push(volume_step(&inst))?;
        rb.advance(CreationPhase::Materialized)?;
        rb.commit()?;
        Ok(inst)
    }

    /// Create a container from an image, pulling the image file from
    /// another node first when this node has no copy.
    pub fn create_from_image(
        &self,
        mut args: ContainerArgs,
        fingerprint: &str,
    ) -> Result<Instance, CoreError> {
        info!("creating '{}' from image {fingerprint}", args.name);
        let image = self.catalog.get_image(fingerprint)?;

        if let Some(node) = self.catalog.locate_image(fingerprint)? {
            let transfer = self.transfer.as_ref().ok_or_else(|| {
                CoreError::DependencyMissing(format!(
                    "image {fingerprint} is on node {node} and no cluster transfer is configured"
                ))
            })?;
            debug!("transferring image {fingerprint} from node {node}");
            transfer.import_image(&node, fingerprint, &self.images_dir())?;
            self.catalog.associate_image_node(fingerprint)?;
        }

        for (key, value) in &image.properties {
            args.config.insert(format!("image.{key}"), value.clone());
        }
        args.base_image = Some(fingerprint.to_owned());

        let mut rb = Rollback::begin(self, WalOpKind::CreateFromImage, &args.name)?;
        let inst = self.create_internal(&mut rb, args)?;
        rb.advance(CreationPhase::Reserved)?;

        self.catalog
            .update_image_last_access(fingerprint, chrono::Utc::now())?;

        let image_file = self.images_dir().join(fingerprint);
        self.driver(inst.pool())?
            .create_from_image(&inst, &image_file)?;
        rb.push(volume_step(&inst))?;
        rb.advance(CreationPhase::Materialized)?;

        self.configure(&inst)?;
        rb.advance(CreationPhase::Configured)?;
        rb.commit()?;
        info!("created '{}' from image {fingerprint}", inst.name());
        Ok(inst)
    }
}
