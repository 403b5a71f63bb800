use std::path::Path;
use anyhow::{anyhow, bail, Context, Result};
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use ndarray::{ArrayD, IxDyn};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};
use defreg_core::{Image, Spacing};
use crate::normalize::normalize_intensities;

/// What was read alongside the voxel data.
#[derive(Debug, Clone)]
pub struct ImageMetadata {
    /// Header of the file, reused when writing results.
    pub header: NiftiHeader,
    /// Extent after dropping singleton axes.
    pub spatial_shape: Vec<usize>,
    /// Voxel size from the header, for the kept axes.
    pub header_spacing: Vec<f64>,
    /// Factor applied by intensity normalization, if any.
    pub intensity_scale: Option<f32>,
}

/// Source and target image prepared for registration.
#[derive(Debug, Clone)]
pub struct ImagePair<B: Backend> {
    pub source: Image<B>,
    pub target: Image<B>,
    pub source_metadata: ImageMetadata,
    pub target_metadata: ImageMetadata,
}

/// Read a NIfTI volume as a single-channel image with batch size 1.
///
/// Singleton axes are dropped, so a `256x256x1` slice becomes a 2D image.
/// With `normalize_spacing` the spacing maps the image onto `[0, 1]^d`;
/// otherwise it is taken from the header `pixdim`.
pub fn read_image<B: Backend, P: AsRef<Path>>(
    path: P,
    normalize_spacing: bool,
    normalize: bool,
    device: &B::Device,
) -> Result<(Image<B>, ImageMetadata)> {
    let path = path.as_ref();
    let obj = ReaderOptions::new()
        .read_file(path)
        .with_context(|| format!("Failed to read NIfTI file {}", path.display()))?;
    let header = obj.header().clone();
    let volume = obj
        .into_volume()
        .into_ndarray::<f32>()
        .context("Failed to convert volume to ndarray")?;

    let full_shape = volume.shape().to_vec();
    let mut kept: Vec<usize> = (0..full_shape.len()).filter(|&a| full_shape[a] > 1).collect();
    if kept.is_empty() {
        kept.push(0);
    }
    if kept.len() > 3 {
        bail!(
            "{}: expected a 1D, 2D or 3D image, found extent {:?}",
            path.display(),
            full_shape
        );
    }
    let spatial_shape: Vec<usize> = kept.iter().map(|&a| full_shape[a]).collect();
    let header_spacing: Vec<f64> = kept
        .iter()
        .map(|&a| {
            let pixdim = header.pixdim.get(a + 1).copied().unwrap_or(1.0) as f64;
            if pixdim > 0.0 { pixdim } else { 1.0 }
        })
        .collect();

    // logical (row-major) order, independent of the on-disk layout
    let mut values: Vec<f32> = volume.iter().copied().collect();
    let intensity_scale = if normalize {
        tracing::info!("Normalizing image intensities of {}", path.display());
        Some(normalize_intensities(&mut values).with_context(|| path.display().to_string())?)
    } else {
        None
    };

    let spacing = if normalize_spacing {
        Spacing::normalized(&spatial_shape)?
    } else {
        Spacing::new(header_spacing.clone())?
    };
    tracing::debug!("{}: extent {:?}, spacing {:?}", path.display(), spatial_shape, spacing.as_slice());

    let image = image_from_values(values, &spatial_shape, spacing, device)?;
    Ok((
        image,
        ImageMetadata {
            header,
            spatial_shape,
            header_spacing,
            intensity_scale,
        },
    ))
}

/// Read source and target and check that they can be registered.
pub fn read_image_pair<B: Backend, P: AsRef<Path>, Q: AsRef<Path>>(
    source: P,
    target: Q,
    normalize_spacing: bool,
    normalize: bool,
    device: &B::Device,
) -> Result<ImagePair<B>> {
    let (source, source_metadata) = read_image(source, normalize_spacing, normalize, device)?;
    let (target, target_metadata) = read_image(target, normalize_spacing, normalize, device)?;
    if source_metadata.spatial_shape != target_metadata.spatial_shape {
        bail!(
            "source extent {:?} differs from target extent {:?}",
            source_metadata.spatial_shape,
            target_metadata.spatial_shape
        );
    }
    Ok(ImagePair {
        source,
        target,
        source_metadata,
        target_metadata,
    })
}

/// Write a field (image, map or parameters) as NIfTI.
///
/// Multi-channel fields are stored with the channel as the last axis. The
/// header of `reference`, if given, is used as template.
pub fn write_field<B: Backend, P: AsRef<Path>>(
    path: P,
    field: &Image<B>,
    reference: Option<&ImageMetadata>,
) -> Result<()> {
    let path = path.as_ref();
    let shape = field.shape();
    if shape[0] != 1 {
        bail!("only single-batch fields can be written, got batch size {}", shape[0]);
    }
    let channels = shape[1];
    let spatial = field.spatial_shape();

    let values = field
        .data()
        .clone()
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| anyhow!("Failed to get tensor data: {:?}", e))?;

    let mut array_shape = vec![channels];
    array_shape.extend_from_slice(&spatial);
    let array = ArrayD::from_shape_vec(IxDyn(&array_shape), values)
        .map_err(|e| anyhow!("Failed to create ndarray: {}", e))?;
    let array = if channels > 1 {
        let mut order: Vec<usize> = (1..array_shape.len()).collect();
        order.push(0);
        array.permuted_axes(IxDyn(&order)).as_standard_layout().into_owned()
    } else {
        array.index_axis_move(ndarray::Axis(0), 0)
    };

    let mut writer = WriterOptions::new(path);
    if let Some(reference) = reference {
        writer = writer.reference_header(&reference.header);
    }
    writer
        .write_nifti(&array)
        .with_context(|| format!("Failed to write NIfTI file {}", path.display()))?;
    tracing::info!("Wrote {}", path.display());
    Ok(())
}

fn image_from_values<B: Backend>(
    values: Vec<f32>,
    spatial: &[usize],
    spacing: Spacing,
    device: &B::Device,
) -> Result<Image<B>> {
    let image = match *spatial {
        [n0] => Image::from_tensor(
            Tensor::<B, 3>::from_data(TensorData::new(values, [1, 1, n0]), device),
            spacing,
        )?,
        [n0, n1] => Image::from_tensor(
            Tensor::<B, 4>::from_data(TensorData::new(values, [1, 1, n0, n1]), device),
            spacing,
        )?,
        [n0, n1, n2] => Image::from_tensor(
            Tensor::<B, 5>::from_data(TensorData::new(values, [1, 1, n0, n1, n2]), device),
            spacing,
        )?,
        _ => bail!("unsupported image extent {:?}", spatial),
    };
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use ndarray::Array3;
    use tempfile::tempdir;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_slice_is_read_as_2d() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("slice.nii");
        let data: Vec<f32> = (0..4 * 5).map(|x| x as f32).collect();
        let array = Array3::from_shape_vec((4, 5, 1), data)?;
        WriterOptions::new(&file_path).write_nifti(&array)?;

        let device = Default::default();
        let (image, metadata) = read_image::<TestBackend, _>(&file_path, true, false, &device)?;
        assert_eq!(image.shape(), vec![1, 1, 4, 5]);
        assert_eq!(metadata.spatial_shape, vec![4, 5]);
        assert_eq!(image.spacing().as_slice(), &[1.0 / 3.0, 0.25]);
        assert!(metadata.intensity_scale.is_none());

        let values = image.data().clone().into_data().to_vec::<f32>().unwrap();
        assert_eq!(values[0], 0.0);
        assert_eq!(values[6], 6.0);
        assert_eq!(values[19], 19.0);
        Ok(())
    }

    #[test]
    fn test_intensities_are_normalized() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("volume.nii");
        let data: Vec<f32> = (0..=100).map(|x| x as f32).collect();
        let array = ndarray::Array1::from_vec(data);
        WriterOptions::new(&file_path).write_nifti(&array)?;

        let device = Default::default();
        let (image, metadata) = read_image::<TestBackend, _>(&file_path, true, true, &device)?;
        assert_eq!(image.spatial_shape(), vec![101]);
        assert!((metadata.intensity_scale.unwrap() - 0.01).abs() < 1e-6);
        let values = image.data().clone().into_data().to_vec::<f32>().unwrap();
        assert!((values[100] - 1.0).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn test_written_map_keeps_channels() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("map.nii");
        let device = Default::default();
        let data = Tensor::<TestBackend, 4>::ones([1, 2, 3, 4], &device);
        let field = Image::from_tensor(data, Spacing::new(vec![1.0, 1.0])?)?;
        write_field(&file_path, &field, None)?;

        let obj = ReaderOptions::new().read_file(&file_path)?;
        let volume = obj.into_volume().into_ndarray::<f32>()?;
        assert_eq!(volume.shape(), &[3, 4, 2]);
        assert!(volume.iter().all(|&v| v == 1.0));
        Ok(())
    }

    #[test]
    fn test_mismatched_pair_is_rejected() -> Result<()> {
        let dir = tempdir()?;
        let a = dir.path().join("a.nii");
        let b = dir.path().join("b.nii");
        WriterOptions::new(&a).write_nifti(&Array3::<f32>::ones((4, 4, 1)))?;
        WriterOptions::new(&b).write_nifti(&Array3::<f32>::ones((4, 5, 1)))?;

        let device = Default::default();
        assert!(read_image_pair::<TestBackend, _, _>(&a, &b, true, false, &device).is_err());
        assert!(read_image_pair::<TestBackend, _, _>(&a, &a, true, true, &device).is_ok());
        Ok(())
    }
}
